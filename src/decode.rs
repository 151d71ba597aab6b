//! Document classification: untyped parse, identity extraction, typed decode.
//!
//! # Invariants
//! - "No registered type for this kind" ([`DecodeError::UnknownKind`]) is
//!   observably distinct from malformed input. Routing depends on it: unknown
//!   sub-documents of an expanded package pass through verbatim, while a
//!   malformed one fails its task.
//! - Decoding never mutates the input; callers keep the raw bytes for
//!   verbatim emission.

use crate::apis::{CompositeResourceDefinition, Provider};

use serde_yaml::Value;
use std::collections::HashMap;
use std::fmt;

/// Group/version/kind identity of a classified document.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Gvk {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl Gvk {
    pub fn new(group: &str, version: &str, kind: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
        }
    }

    /// Split a wire `apiVersion` (`group/version`, or bare `version` for the
    /// core group) and pair it with a kind.
    pub fn from_api_version(api_version: &str, kind: &str) -> Self {
        match api_version.split_once('/') {
            Some((group, version)) => Self::new(group, version, kind),
            None => Self::new("", api_version, kind),
        }
    }
}

impl fmt::Display for Gvk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}, Kind={}", self.version, self.kind)
        } else {
            write!(f, "{}/{}, Kind={}", self.group, self.version, self.kind)
        }
    }
}

/// Why a document failed to decode.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The bytes are not a parseable document.
    #[error("malformed document: {0}")]
    Malformed(#[from] serde_yaml::Error),

    /// Parseable, but carries no usable apiVersion/kind identity.
    #[error("document has no apiVersion/kind identity")]
    MissingIdentity,

    /// Identity extracted, but the scheme has no registration for it.
    #[error("no registered type for {0}")]
    UnknownKind(Gvk),
}

impl DecodeError {
    /// The one decode failure that means pass-through instead of error.
    #[inline]
    pub fn is_unknown_kind(&self) -> bool {
        matches!(self, DecodeError::UnknownKind(_))
    }
}

/// A successfully instantiated typed object.
#[derive(Clone, Debug)]
pub enum TypedObject {
    Provider(Provider),
    CompositeResourceDefinition(CompositeResourceDefinition),
}

type Instantiate = fn(&Value) -> Result<TypedObject, DecodeError>;

/// Registry of typed kinds the pipeline understands.
pub struct Scheme {
    types: HashMap<Gvk, Instantiate>,
}

impl Scheme {
    /// Empty scheme; useful for tests that want every kind unknown.
    pub fn empty() -> Self {
        Self {
            types: HashMap::new(),
        }
    }

    pub fn register(&mut self, gvk: Gvk, instantiate: Instantiate) {
        self.types.insert(gvk, instantiate);
    }

    /// Untyped pass: parse the document and extract its identity.
    pub fn decode_raw(&self, bytes: &[u8]) -> Result<(Value, Gvk), DecodeError> {
        let value: Value = serde_yaml::from_slice(bytes)?;
        let gvk = identity_of(&value).ok_or(DecodeError::MissingIdentity)?;
        Ok((value, gvk))
    }

    /// Typed pass: instantiate a registered kind from its untyped form.
    pub fn instantiate(&self, gvk: &Gvk, value: &Value) -> Result<TypedObject, DecodeError> {
        match self.types.get(gvk) {
            Some(instantiate) => instantiate(value),
            None => Err(DecodeError::UnknownKind(gvk.clone())),
        }
    }

    /// Both passes in one call.
    pub fn decode(&self, bytes: &[u8]) -> Result<(TypedObject, Gvk), DecodeError> {
        let (value, gvk) = self.decode_raw(bytes)?;
        let obj = self.instantiate(&gvk, &value)?;
        Ok((obj, gvk))
    }
}

impl Default for Scheme {
    /// Scheme with the two expansion-trigger kinds registered.
    fn default() -> Self {
        let mut scheme = Self::empty();
        scheme.register(
            Gvk::new("pkg.crossplane.io", "v1", "Provider"),
            |value| {
                serde_yaml::from_value::<Provider>(value.clone())
                    .map(TypedObject::Provider)
                    .map_err(DecodeError::Malformed)
            },
        );
        scheme.register(
            Gvk::new("apiextensions.crossplane.io", "v1", "CompositeResourceDefinition"),
            |value| {
                serde_yaml::from_value::<CompositeResourceDefinition>(value.clone())
                    .map(TypedObject::CompositeResourceDefinition)
                    .map_err(DecodeError::Malformed)
            },
        );
        scheme
    }
}

fn identity_of(value: &Value) -> Option<Gvk> {
    if !value.is_mapping() {
        return None;
    }
    let api_version = value.get("apiVersion")?.as_str()?;
    let kind = value.get("kind")?.as_str()?;
    if api_version.is_empty() || kind.is_empty() {
        return None;
    }
    Some(Gvk::from_api_version(api_version, kind))
}
