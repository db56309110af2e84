//! # pilot-types
//!
//! Wire messages of the aggregated discovery protocol.
//!
//! The messages carry the same field numbers as the Envoy v3 protos, so a real
//! proxy can talk to the server without any generated code in this workspace.
//! Only the fields the control plane reads or writes are declared; prost skips
//! unknown fields when decoding.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

pub use prost::Message;
pub use prost_types::Any;

pub mod envoy {
    //! Envoy xDS types.

    pub mod service {
        //! Envoy discovery service definitions.

        pub mod discovery {
            //! Core discovery service types.

            pub mod v3 {
                //! Discovery service v3 API.

                use crate::envoy::config::core::v3::{ControlPlane, Node};
                use crate::google::rpc::Status;

                /// Discovery request sent by proxies.
                #[derive(Clone, PartialEq, ::prost::Message)]
                pub struct DiscoveryRequest {
                    /// Version the proxy last accepted for this type.
                    #[prost(string, tag = "1")]
                    pub version_info: ::prost::alloc::string::String,
                    /// Proxy identity. Required on the first request of a stream.
                    #[prost(message, optional, tag = "2")]
                    pub node: ::core::option::Option<Node>,
                    /// Requested resource names; empty means everything.
                    #[prost(string, repeated, tag = "3")]
                    pub resource_names: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
                    /// Type URL of requested resources.
                    #[prost(string, tag = "4")]
                    pub type_url: ::prost::alloc::string::String,
                    /// Nonce of the response being acknowledged.
                    #[prost(string, tag = "5")]
                    pub response_nonce: ::prost::alloc::string::String,
                    /// Present when the proxy rejects the response.
                    #[prost(message, optional, tag = "6")]
                    pub error_detail: ::core::option::Option<Status>,
                }

                /// Discovery response sent by the control plane.
                #[derive(Clone, PartialEq, ::prost::Message)]
                pub struct DiscoveryResponse {
                    /// Version of this response.
                    #[prost(string, tag = "1")]
                    pub version_info: ::prost::alloc::string::String,
                    /// Resources.
                    #[prost(message, repeated, tag = "2")]
                    pub resources: ::prost::alloc::vec::Vec<::prost_types::Any>,
                    /// Canary flag.
                    #[prost(bool, tag = "3")]
                    pub canary: bool,
                    /// Type URL of the resources.
                    #[prost(string, tag = "4")]
                    pub type_url: ::prost::alloc::string::String,
                    /// Unique nonce for this response.
                    #[prost(string, tag = "5")]
                    pub nonce: ::prost::alloc::string::String,
                    /// Control plane identifier.
                    #[prost(message, optional, tag = "6")]
                    pub control_plane: ::core::option::Option<ControlPlane>,
                }

                impl DiscoveryRequest {
                    /// Whether this request rejects a previous response.
                    #[must_use]
                    pub fn is_nack(&self) -> bool {
                        self.error_detail.is_some()
                    }

                    /// Rejection message, if any.
                    #[must_use]
                    pub fn error_message(&self) -> Option<&str> {
                        self.error_detail.as_ref().map(|s| s.message.as_str())
                    }
                }
            }
        }
    }

    pub mod config {
        //! Envoy configuration types.

        pub mod core {
            //! Core configuration types.

            pub mod v3 {
                //! Core v3 API.

                /// Proxy node information.
                #[derive(Clone, PartialEq, ::prost::Message)]
                pub struct Node {
                    /// Node identifier, `type~ip~id~domain` for sidecars.
                    #[prost(string, tag = "1")]
                    pub id: ::prost::alloc::string::String,
                    /// Cluster the node belongs to.
                    #[prost(string, tag = "2")]
                    pub cluster: ::prost::alloc::string::String,
                    /// Free-form node metadata.
                    #[prost(message, optional, tag = "3")]
                    pub metadata: ::core::option::Option<::prost_types::Struct>,
                    /// Locality reported by the proxy.
                    #[prost(message, optional, tag = "4")]
                    pub locality: ::core::option::Option<Locality>,
                }

                /// Control plane identifier.
                #[derive(Clone, PartialEq, ::prost::Message)]
                pub struct ControlPlane {
                    /// Identifier for this control plane.
                    #[prost(string, tag = "1")]
                    pub identifier: ::prost::alloc::string::String,
                }

                /// Locality information.
                #[derive(Clone, PartialEq, ::prost::Message)]
                pub struct Locality {
                    /// Region.
                    #[prost(string, tag = "1")]
                    pub region: ::prost::alloc::string::String,
                    /// Zone.
                    #[prost(string, tag = "2")]
                    pub zone: ::prost::alloc::string::String,
                    /// Sub-zone.
                    #[prost(string, tag = "3")]
                    pub sub_zone: ::prost::alloc::string::String,
                }

                impl Node {
                    /// Look up a string value in the node metadata.
                    #[must_use]
                    pub fn metadata_string(&self, key: &str) -> Option<&str> {
                        use ::prost_types::value::Kind;

                        let value = self.metadata.as_ref()?.fields.get(key)?;
                        match value.kind.as_ref()? {
                            Kind::StringValue(s) => Some(s.as_str()),
                            _ => None,
                        }
                    }
                }
            }
        }
    }
}

pub mod google {
    //! Google API types.

    pub mod rpc {
        //! gRPC status types.

        /// Status carried in a NACK.
        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct Status {
            /// Status code.
            #[prost(int32, tag = "1")]
            pub code: i32,
            /// Status message.
            #[prost(string, tag = "2")]
            pub message: ::prost::alloc::string::String,
            /// Details.
            #[prost(message, repeated, tag = "3")]
            pub details: ::prost::alloc::vec::Vec<::prost_types::Any>,
        }
    }
}

pub use envoy::config::core::v3::{ControlPlane, Locality, Node};
pub use envoy::service::discovery::v3::{DiscoveryRequest, DiscoveryResponse};
pub use google::rpc::Status;
