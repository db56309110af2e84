//! # pilot-core
//!
//! Shared vocabulary for the meshpilot control plane.
//!
//! Every other crate in the workspace builds on these types:
//!
//! - [`PilotError`] - Error type with gRPC status code mapping
//! - [`NodeHash`] - FNV hash of a proxy node id
//! - [`ResourceVersion`] - Version identifiers, including content-derived versions
//! - [`Resource`] - Trait for anything that can be pushed to a proxy
//! - [`TypeUrl`] - Type URL handling and constants
//!
//! ## Example
//!
//! ```rust
//! use pilot_core::{ResourceVersion, TypeUrl};
//!
//! let clusters = TypeUrl::new(TypeUrl::CLUSTER);
//! assert_eq!(clusters.short_name(), "Cluster");
//!
//! let v = ResourceVersion::from_content([b"outbound|80||svc".as_slice()]);
//! assert!(!v.is_empty());
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod node;
mod resource;
mod type_url;
mod version;

pub use error::PilotError;
pub use node::NodeHash;
pub use resource::{encode_all, BoxResource, EncodedResources, Resource};
pub use type_url::{ResourceKind, TypeUrl};
pub use version::ResourceVersion;

/// Result type alias using [`PilotError`].
pub type Result<T> = std::result::Result<T, PilotError>;

/// Alias for [`Result`] used across the workspace.
pub type PilotResult<T> = Result<T>;
