//! Typed API objects the scheme knows how to instantiate.
//!
//! Field sets are deliberately partial: only what classification, expansion,
//! and synthesis read or emit. Unknown fields are preserved nowhere — raw
//! pass-through documents never travel through these types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Object metadata subset.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
}

/// A single owner link.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<bool>,
}

// ============================================================================
// Package reference
// ============================================================================

/// A provider package reference: names a remotely hosted package image.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Provider {
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: ProviderSpec,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSpec {
    /// Image reference of the package to pull.
    pub package: String,
}

// ============================================================================
// Composite resource definition
// ============================================================================

/// A composite definition: describes a generated custom-resource schema.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeResourceDefinition {
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: CompositeResourceDefinitionSpec,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeResourceDefinitionSpec {
    pub group: String,
    pub names: ResourceNames,
    /// Optional claim identity; when declared (non-empty kind), a second
    /// namespaced definition is synthesized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_names: Option<ResourceNames>,
    #[serde(default)]
    pub versions: Vec<DefinedVersion>,
}

impl CompositeResourceDefinition {
    /// True when the definition declares a usable claim identity.
    #[inline]
    pub fn offers_claim(&self) -> bool {
        self.spec
            .claim_names
            .as_ref()
            .is_some_and(|n| !n.kind.is_empty())
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceNames {
    pub plural: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub singular: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub list_kind: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DefinedVersion {
    pub name: String,
    #[serde(default)]
    pub served: bool,
    /// Exactly one version must be referenceable; it becomes the stored one.
    #[serde(default)]
    pub referenceable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<VersionSchema>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionSchema {
    /// Validation schema carried through untyped; its internals are opaque here.
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "openAPIV3Schema")]
    pub open_api_v3_schema: Option<serde_yaml::Value>,
}

// ============================================================================
// Synthesized output
// ============================================================================

/// A derived custom-resource definition.
///
/// `api_version`/`kind` start empty out of synthesis; the route handler
/// stamps the canonical identity before emission.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomResourceDefinition {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: CustomResourceDefinitionSpec,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomResourceDefinitionSpec {
    pub group: String,
    pub names: ResourceNames,
    pub scope: String,
    #[serde(default)]
    pub versions: Vec<CrdVersion>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrdVersion {
    pub name: String,
    pub served: bool,
    pub storage: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<VersionSchema>,
}
