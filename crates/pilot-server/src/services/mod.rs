//! gRPC services.

pub mod ads;

pub use ads::{AdsResponseStream, AdsService, AggregatedDiscoveryService, AggregatedDiscoveryServiceServer};
