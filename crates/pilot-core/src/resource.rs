//! The [`Resource`] trait and helpers for encoding resource sets.

use std::fmt;
use std::sync::Arc;

use crate::{PilotError, ResourceVersion};

/// Anything that can be delivered to a proxy.
///
/// Implementations must encode deterministically: the same logical resource
/// must always produce the same bytes, because versions are derived from them.
pub trait Resource: Send + Sync + fmt::Debug {
    /// Type URL of the encoded message.
    fn type_url(&self) -> &str;

    /// Resource name, unique within its type.
    fn name(&self) -> &str;

    /// Encode to a protobuf `Any`.
    fn encode(&self) -> Result<prost_types::Any, PilotError>;
}

/// Shared, type-erased resource.
pub type BoxResource = Arc<dyn Resource>;

/// A fully encoded resource set together with its content version.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EncodedResources {
    /// Encoded resources in the order they were produced.
    pub resources: Vec<prost_types::Any>,
    /// Names in the same order as `resources`.
    pub names: Vec<String>,
    /// Version derived from the encoded bytes.
    pub version: ResourceVersion,
}

impl EncodedResources {
    /// Number of resources.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether the set is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// Encode every resource and derive the version of the whole set.
///
/// Stops at the first resource that fails to encode.
pub fn encode_all<'a, I, R>(resources: I) -> Result<EncodedResources, PilotError>
where
    I: IntoIterator<Item = &'a R>,
    R: Resource + ?Sized + 'a,
{
    let mut encoded = Vec::new();
    let mut names = Vec::new();
    for resource in resources {
        encoded.push(resource.encode()?);
        names.push(resource.name().to_string());
    }
    let version = ResourceVersion::from_content(
        encoded
            .iter()
            .flat_map(|any| [any.type_url.as_bytes(), any.value.as_slice()]),
    );
    Ok(EncodedResources {
        resources: encoded,
        names,
        version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TypeUrl;

    #[derive(Debug)]
    struct Named(&'static str);

    impl Resource for Named {
        fn type_url(&self) -> &str {
            TypeUrl::CLUSTER
        }

        fn name(&self) -> &str {
            self.0
        }

        fn encode(&self) -> Result<prost_types::Any, PilotError> {
            if self.0.is_empty() {
                return Err(PilotError::encoding(TypeUrl::CLUSTER, self.0, "empty name"));
            }
            Ok(prost_types::Any {
                type_url: TypeUrl::CLUSTER.to_string(),
                value: self.0.as_bytes().to_vec(),
            })
        }
    }

    #[test]
    fn encode_all_keeps_order_and_names() {
        let set = [Named("a"), Named("b")];
        let encoded = encode_all(set.iter()).unwrap();
        assert_eq!(encoded.names, vec!["a", "b"]);
        assert_eq!(encoded.len(), 2);
        assert!(!encoded.version.is_empty());
    }

    #[test]
    fn same_input_same_version() {
        let first = encode_all([Named("a"), Named("b")].iter()).unwrap();
        let second = encode_all([Named("a"), Named("b")].iter()).unwrap();
        let reordered = encode_all([Named("b"), Named("a")].iter()).unwrap();
        assert_eq!(first.version, second.version);
        assert_ne!(first.version, reordered.version);
    }

    #[test]
    fn encode_failure_propagates() {
        let err = encode_all([Named("a"), Named("")].iter()).unwrap_err();
        assert!(matches!(err, PilotError::EncodingError { .. }));
    }

    #[test]
    fn works_with_boxed_resources() {
        let boxed: Vec<BoxResource> = vec![Arc::new(Named("x"))];
        let encoded = encode_all(boxed.iter().map(|r| r.as_ref())).unwrap();
        assert_eq!(encoded.names, vec!["x"]);
    }
}
