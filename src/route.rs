//! Routing of classified documents to expansion handlers.
//!
//! Dispatch is a table keyed by `(group, kind)` rather than a conditional
//! chain: registering a handler is the extension point, and anything without
//! a route is consumed and dropped.
//!
//! The two stock routes:
//! - package references unpack the remote image and re-split its embedded
//!   manifest into sub-documents;
//! - composite definitions synthesize custom-resource definitions.
//!
//! Sub-document policy differs from the top level on purpose: top-level
//! unknown kinds are dropped, while unknown kinds inside an expanded package
//! pass through verbatim. Package-internal metadata (the meta group) is
//! never emitted.

use crate::config::EmitMode;
use crate::decode::{Gvk, Scheme, TypedObject};
use crate::error::{Error, Result};
use crate::pipeline::{split_documents, Emitted, Emitter};
use crate::unpack::Unpacker;
use crate::{cancel::CancelToken, xcrd};

use std::collections::HashMap;
use std::sync::Arc;

/// Reserved group for package-internal metadata; never emitted.
pub const META_GROUP: &str = "meta.pkg.crossplane.io";

/// Canonical identity stamped onto synthesized definitions.
pub const CRD_API_VERSION: &str = "apiextensions.k8s.io/v1";
pub const CRD_KIND: &str = "CustomResourceDefinition";

/// Per-task capabilities a handler may use.
pub struct TaskContext<'a> {
    pub token: &'a CancelToken,
    pub emitter: &'a Emitter,
}

/// One expansion capability.
pub trait RouteHandler: Send + Sync {
    fn handle(&self, obj: TypedObject, gvk: &Gvk, cx: &TaskContext<'_>) -> Result<()>;
}

/// Table of handlers keyed by `(group, kind)`.
pub struct Router {
    routes: HashMap<(String, String), Box<dyn RouteHandler>>,
}

impl Router {
    pub fn empty() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    /// Router with the two stock expansion routes.
    pub fn with_defaults(unpacker: Arc<Unpacker>, scheme: Arc<Scheme>, mode: EmitMode) -> Self {
        let mut router = Self::empty();
        router.register(
            "pkg.crossplane.io",
            "Provider",
            Box::new(PackageHandler {
                unpacker,
                scheme,
                mode,
            }),
        );
        router.register(
            "apiextensions.crossplane.io",
            "CompositeResourceDefinition",
            Box::new(DefinitionHandler),
        );
        router
    }

    pub fn register(&mut self, group: &str, kind: &str, handler: Box<dyn RouteHandler>) {
        self.routes
            .insert((group.to_string(), kind.to_string()), handler);
    }

    pub fn route(&self, gvk: &Gvk) -> Option<&dyn RouteHandler> {
        self.routes
            .get(&(gvk.group.clone(), gvk.kind.clone()))
            .map(Box::as_ref)
    }
}

// ============================================================================
// Package references
// ============================================================================

/// Unpacks a referenced package image and emits its sub-documents.
struct PackageHandler {
    unpacker: Arc<Unpacker>,
    scheme: Arc<Scheme>,
    mode: EmitMode,
}

impl RouteHandler for PackageHandler {
    fn handle(&self, obj: TypedObject, _gvk: &Gvk, cx: &TaskContext<'_>) -> Result<()> {
        let TypedObject::Provider(provider) = obj else {
            return Ok(());
        };

        tracing::info!(
            name = %provider.metadata.name,
            package = %provider.spec.package,
            "unpacking provider package"
        );

        let manifest = self.unpacker.unpack(&provider.spec.package, cx.token)?;
        self.expand(&manifest, cx)
    }
}

impl PackageHandler {
    /// Re-split the embedded manifest and emit its surviving sub-documents,
    /// preserving their order.
    fn expand(&self, manifest: &[u8], cx: &TaskContext<'_>) -> Result<()> {
        for doc in split_documents(manifest) {
            cx.token.check()?;

            // Malformed or identity-less sub-documents make the whole package
            // suspect; only "kind not registered" is benign.
            let (value, gvk) = self.scheme.decode_raw(doc)?;

            if gvk.group == META_GROUP {
                tracing::debug!(gvk = %gvk, "filtering package-internal metadata");
                continue;
            }

            match self.scheme.instantiate(&gvk, &value) {
                Ok(_typed) => {
                    let entry = match self.mode {
                        EmitMode::Raw => Emitted::Raw(doc.to_vec()),
                        EmitMode::Decoded => Emitted::Object(value),
                    };
                    cx.emitter.emit(entry)?;
                }
                Err(err) if err.is_unknown_kind() => {
                    // Unknown embedded resources pass through verbatim.
                    cx.emitter.emit(Emitted::Raw(doc.to_vec()))?;
                }
                Err(err) => return Err(Error::Decode(err)),
            }
        }
        Ok(())
    }
}

// ============================================================================
// Composite definitions
// ============================================================================

/// Synthesizes custom-resource definitions from a composite definition.
struct DefinitionHandler;

impl RouteHandler for DefinitionHandler {
    fn handle(&self, obj: TypedObject, _gvk: &Gvk, cx: &TaskContext<'_>) -> Result<()> {
        let TypedObject::CompositeResourceDefinition(xrd) = obj else {
            return Ok(());
        };

        tracing::info!(name = %xrd.metadata.name, "synthesizing resource definitions");

        let mut derived = vec![xcrd::for_composite_resource(&xrd)?];
        if xrd.offers_claim() {
            derived.push(xcrd::for_composite_resource_claim(&xrd)?);
        }

        for mut crd in derived {
            // Derived output must not inherit an owner link from the
            // definition it came from.
            crd.metadata.owner_references.clear();
            crd.api_version = CRD_API_VERSION.to_string();
            crd.kind = CRD_KIND.to_string();

            let value = serde_yaml::to_value(&crd).map_err(|err| Error::Synthesis {
                name: crd.metadata.name.clone(),
                reason: err.to_string(),
            })?;
            cx.emitter.emit(Emitted::Object(value))?;
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
