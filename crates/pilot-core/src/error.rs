//! Error types for control plane operations.
//!
//! [`PilotError`] covers the failure modes of the push path and converts into
//! [`tonic::Status`] when a failure has to be reported on a stream.

/// Error type for control plane operations.
///
/// Most variants are recoverable: the caller logs them and skips the affected
/// service, cluster, or request. Only stream-level variants end a session.
///
/// # Example
///
/// ```rust
/// use pilot_core::PilotError;
///
/// let err = PilotError::UnsupportedType {
///     type_url: "type.googleapis.com/envoy.config.listener.v3.Listener".to_string(),
/// };
/// assert!(err.to_string().contains("Listener"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum PilotError {
    /// Malformed or unknown type URL.
    #[error("invalid type URL: {type_url} - {reason}")]
    InvalidTypeUrl {
        /// The invalid type URL.
        type_url: String,
        /// Reason why the type URL is invalid.
        reason: String,
    },

    /// No generator is able to produce resources of this type.
    #[error("unsupported resource type: {type_url}")]
    UnsupportedType {
        /// The requested type URL.
        type_url: String,
    },

    /// A request arrived before the proxy identified itself.
    #[error("request on stream {stream} is missing node information")]
    MissingNode {
        /// Stream that sent the request.
        stream: String,
    },

    /// The proxy node id could not be interpreted.
    #[error("invalid node id {node_id:?}: {reason}")]
    InvalidNode {
        /// The raw node id.
        node_id: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Resource encoding failed.
    #[error("encoding error for {type_url}/{name}: {message}")]
    EncodingError {
        /// The type URL being encoded.
        type_url: String,
        /// The resource name.
        name: String,
        /// Error message.
        message: String,
    },

    /// Policy source lookup failed for a service.
    #[error("policy lookup failed for {host}: {message}")]
    PolicyLookup {
        /// Service host the lookup was for.
        host: String,
        /// Error message.
        message: String,
    },

    /// Client rejected configuration (NACK).
    #[error("NACK received from {node_id} for {type_url}: {error_message}")]
    NackReceived {
        /// The node ID that sent the NACK.
        node_id: String,
        /// The type URL that was rejected.
        type_url: String,
        /// The nonce of the rejected response.
        nonce: String,
        /// Error message from the client.
        error_message: String,
    },

    /// Client stream closed.
    #[error("stream closed: {reason}")]
    StreamClosed {
        /// Reason for stream closure.
        reason: String,
    },

    /// Operation timed out.
    #[error("operation timed out: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
    },

    /// Server is shutting down.
    #[error("server is shutting down")]
    Shutdown,

    /// Unexpected internal error.
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
        /// Optional underlying error.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl PilotError {
    /// Create an internal error from any error type.
    pub fn internal<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Internal {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an encoding error for a named resource.
    pub fn encoding(
        type_url: impl Into<String>,
        name: impl Into<String>,
        message: impl std::fmt::Display,
    ) -> Self {
        Self::EncodingError {
            type_url: type_url.into(),
            name: name.into(),
            message: message.to_string(),
        }
    }

    /// Whether this error should terminate the stream that produced it.
    pub fn is_fatal_for_stream(&self) -> bool {
        matches!(
            self,
            Self::MissingNode { .. }
                | Self::InvalidNode { .. }
                | Self::StreamClosed { .. }
                | Self::Timeout { .. }
                | Self::Shutdown
        )
    }
}

/// Maps each error variant to a gRPC status code.
impl From<PilotError> for tonic::Status {
    fn from(err: PilotError) -> Self {
        match &err {
            PilotError::InvalidTypeUrl { .. }
            | PilotError::MissingNode { .. }
            | PilotError::InvalidNode { .. }
            | PilotError::Configuration(_) => tonic::Status::invalid_argument(err.to_string()),
            PilotError::UnsupportedType { .. } => tonic::Status::unimplemented(err.to_string()),
            PilotError::EncodingError { .. }
            | PilotError::PolicyLookup { .. }
            | PilotError::Internal { .. } => tonic::Status::internal(err.to_string()),
            // NACKs are informational for the server
            PilotError::NackReceived { .. } => tonic::Status::ok(err.to_string()),
            PilotError::StreamClosed { .. } | PilotError::Shutdown => {
                tonic::Status::unavailable(err.to_string())
            }
            PilotError::Timeout { .. } => tonic::Status::deadline_exceeded(err.to_string()),
        }
    }
}
