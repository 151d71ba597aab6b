//! Synthesis of custom-resource definitions from composite definitions.
//!
//! Pure functions over the typed objects: no I/O, no pipeline state. The
//! synthesized objects carry an owner reference back to their definition;
//! the route handler clears it before emission so derived output never
//! inherits an owner link.

use crate::apis::{
    CompositeResourceDefinition, CrdVersion, CustomResourceDefinition,
    CustomResourceDefinitionSpec, ObjectMeta, OwnerReference, ResourceNames,
};
use crate::error::{Error, Result};

/// Derive the cluster-scoped definition for the composite resource itself.
pub fn for_composite_resource(xrd: &CompositeResourceDefinition) -> Result<CustomResourceDefinition> {
    let names = xrd.spec.names.clone();
    build(xrd, names, "Cluster")
}

/// Derive the namespaced definition for the claim identity.
///
/// Fails when the definition declares no claim identity; callers gate on
/// [`CompositeResourceDefinition::offers_claim`].
pub fn for_composite_resource_claim(
    xrd: &CompositeResourceDefinition,
) -> Result<CustomResourceDefinition> {
    let names = match &xrd.spec.claim_names {
        Some(names) if !names.kind.is_empty() => names.clone(),
        _ => {
            return Err(Error::Synthesis {
                name: xrd.metadata.name.clone(),
                reason: "definition declares no claim identity".to_string(),
            })
        }
    };
    build(xrd, names, "Namespaced")
}

fn build(
    xrd: &CompositeResourceDefinition,
    names: ResourceNames,
    scope: &str,
) -> Result<CustomResourceDefinition> {
    let referenceable = xrd
        .spec
        .versions
        .iter()
        .filter(|v| v.referenceable)
        .count();
    if referenceable != 1 {
        return Err(Error::Synthesis {
            name: xrd.metadata.name.clone(),
            reason: format!("exactly one version must be referenceable, found {referenceable}"),
        });
    }

    let versions = xrd
        .spec
        .versions
        .iter()
        .map(|v| CrdVersion {
            name: v.name.clone(),
            served: v.served,
            // The referenceable version is the stored one.
            storage: v.referenceable,
            schema: v.schema.clone(),
        })
        .collect();

    Ok(CustomResourceDefinition {
        api_version: String::new(), // stamped by the route handler
        kind: String::new(),
        metadata: ObjectMeta {
            name: format!("{}.{}", names.plural, xrd.spec.group),
            owner_references: vec![OwnerReference {
                api_version: "apiextensions.crossplane.io/v1".to_string(),
                kind: "CompositeResourceDefinition".to_string(),
                name: xrd.metadata.name.clone(),
                controller: Some(true),
            }],
            ..Default::default()
        },
        spec: CustomResourceDefinitionSpec {
            group: xrd.spec.group.clone(),
            names,
            scope: scope.to_string(),
            versions,
        },
    })
}
