//! Resource versions.
//!
//! The control plane never uses counters for versions. A version is derived
//! from the encoded bytes of the resources it describes, so compiling the same
//! configuration twice always yields the same version.

use std::fmt;
use std::hash::Hasher;

use fnv::FnvHasher;

/// Version identifier for a set of resources.
///
/// An empty version means "nothing accepted yet".
///
/// # Example
///
/// ```rust
/// use pilot_core::ResourceVersion;
///
/// let a = ResourceVersion::from_content([b"one".as_slice(), b"two".as_slice()]);
/// let b = ResourceVersion::from_content([b"one".as_slice(), b"two".as_slice()]);
/// assert_eq!(a, b);
/// assert!(ResourceVersion::empty().is_empty());
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ResourceVersion(String);

impl ResourceVersion {
    /// Wrap an existing version string, e.g. one echoed back by a proxy.
    #[must_use]
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    /// The empty version.
    #[must_use]
    pub fn empty() -> Self {
        Self(String::new())
    }

    /// Derive a version from an ordered sequence of encoded resources.
    ///
    /// Each chunk is length-prefixed before hashing so that `["ab", "c"]` and
    /// `["a", "bc"]` produce different versions.
    #[must_use]
    pub fn from_content<'a, I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut hasher = FnvHasher::default();
        let mut count: u64 = 0;
        for chunk in chunks {
            hasher.write_u64(chunk.len() as u64);
            hasher.write(chunk);
            count += 1;
        }
        hasher.write_u64(count);
        Self(format!("{:016x}", hasher.finish()))
    }

    /// Whether this is the empty version.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get the version as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ResourceVersion {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ResourceVersion {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for ResourceVersion {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
