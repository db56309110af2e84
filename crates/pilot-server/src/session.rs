//! Per-(connection, type) push state machine.
//!
//! A [`PushSession`] knows nothing about transport or compilation. The stream
//! driver feeds it requests and change notifications; it answers with a
//! [`Decision`]. When the decision is [`Decision::Push`] the driver compiles
//! and hands the result to [`PushSession::build_push`], which either produces
//! the response to send or suppresses it.
//!
//! ```text
//! Uninitialized ──request──▶ AwaitingAck{nonce, version} ──ACK──▶ Accepted{version}
//!                                  │  ▲                                │
//!                                  │  └──────────── push ──────────────┘
//!                                  └──NACK──▶ Accepted{previous}
//! ```

use pilot_core::{EncodedResources, ResourceVersion, TypeUrl};
use pilot_types::{ControlPlane, DiscoveryRequest, DiscoveryResponse};
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::utils::generate_nonce;

/// Protocol state of one resource type on one connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// No request seen for this type yet.
    Uninitialized,
    /// A push is outstanding.
    AwaitingAck {
        /// Nonce of the outstanding push.
        nonce: String,
        /// Version of the outstanding push.
        version: ResourceVersion,
    },
    /// Nothing outstanding. The version is empty if nothing was ever accepted.
    Accepted {
        /// Last version the proxy accepted.
        version: ResourceVersion,
    },
}

/// What the driver should do after a transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Compile and push. If the compiled version equals `unless`, adopt it as
    /// accepted and send nothing.
    Push {
        /// Version that makes the push redundant.
        unless: Option<ResourceVersion>,
    },
    /// Send nothing.
    Hold(HoldReason),
}

impl Decision {
    fn push(unless: Option<ResourceVersion>) -> Self {
        Self::Push { unless }
    }
}

/// Why nothing is sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HoldReason {
    /// ACK with nothing new to push.
    Acknowledged,
    /// The proxy rejected the push.
    Rejected,
    /// A push is outstanding; the change is remembered.
    Outstanding,
    /// The reconnecting proxy already has the accepted version.
    UpToDate,
    /// Rejection that refers to an old push.
    StaleRejection,
    /// The proxy has not asked for this type.
    NotSubscribed,
}

/// A rejected push.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Rejection {
    /// Nonce of the rejected push.
    pub nonce: String,
    /// Version that was rejected.
    pub version: String,
    /// Error reported by the proxy.
    pub message: String,
}

/// Read-only view of a session for admin dumps.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    /// Resource type.
    pub type_url: String,
    /// Last accepted version, empty if none.
    pub accepted_version: String,
    /// Nonce of the outstanding push.
    pub outstanding_nonce: Option<String>,
    /// A change arrived while a push was outstanding.
    pub pending_change: bool,
    /// Pushes sent.
    pub pushes: u64,
    /// Pushes rejected.
    pub rejections: u64,
    /// Most recent rejection.
    pub last_rejection: Option<Rejection>,
    /// Names of the resources in the accepted version.
    pub resources: Vec<String>,
    /// Names of the resources in the outstanding push.
    pub outstanding_resources: Vec<String>,
}

/// Push state for one resource type on one connection.
#[derive(Debug)]
pub struct PushSession {
    type_url: TypeUrl,
    state: SessionState,
    accepted: ResourceVersion,
    subscription: Vec<String>,
    pending_change: bool,
    pushes: u64,
    rejections: u64,
    last_rejection: Option<Rejection>,
    accepted_names: Vec<String>,
    outstanding_names: Vec<String>,
    control_plane: Option<String>,
}

impl PushSession {
    /// A session that has not seen a request yet.
    pub fn new(type_url: TypeUrl) -> Self {
        Self {
            type_url,
            state: SessionState::Uninitialized,
            accepted: ResourceVersion::empty(),
            subscription: Vec::new(),
            pending_change: false,
            pushes: 0,
            rejections: 0,
            last_rejection: None,
            accepted_names: Vec::new(),
            outstanding_names: Vec::new(),
            control_plane: None,
        }
    }

    /// Stamp responses with a control plane identifier.
    #[must_use]
    pub fn with_control_plane(mut self, identifier: impl Into<String>) -> Self {
        self.control_plane = Some(identifier.into());
        self
    }

    /// Resource type.
    #[inline]
    pub fn type_url(&self) -> &TypeUrl {
        &self.type_url
    }

    /// Current state.
    #[inline]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Last accepted version, if any.
    pub fn accepted_version(&self) -> Option<&ResourceVersion> {
        (!self.accepted.is_empty()).then_some(&self.accepted)
    }

    /// Nonce of the outstanding push.
    pub fn outstanding_nonce(&self) -> Option<&str> {
        match &self.state {
            SessionState::AwaitingAck { nonce, .. } => Some(nonce),
            _ => None,
        }
    }

    /// Whether a push is outstanding.
    #[inline]
    pub fn is_awaiting_ack(&self) -> bool {
        matches!(self.state, SessionState::AwaitingAck { .. })
    }

    /// Requested resource names; empty means everything.
    #[inline]
    pub fn subscription(&self) -> &[String] {
        &self.subscription
    }

    /// Whether a change is waiting for the outstanding push to resolve.
    #[inline]
    pub fn has_pending_change(&self) -> bool {
        self.pending_change
    }

    /// Rejections so far.
    #[inline]
    pub fn rejections(&self) -> u64 {
        self.rejections
    }

    /// Most recent rejection.
    pub fn last_rejection(&self) -> Option<&Rejection> {
        self.last_rejection.as_ref()
    }

    /// Pushes sent so far.
    #[inline]
    pub fn pushes(&self) -> u64 {
        self.pushes
    }

    /// Apply a request from the proxy.
    pub fn handle_request(&mut self, request: &DiscoveryRequest) -> Decision {
        let subscription_changed = self.update_subscription(&request.resource_names);
        let nonce = request.response_nonce.as_str();

        let outstanding = match &self.state {
            SessionState::AwaitingAck { nonce, version } => Some((nonce.clone(), version.clone())),
            _ => None,
        };

        match outstanding {
            Some((expected, version)) if expected == nonce => match request.error_message() {
                Some(message) => self.reject(nonce, &version, message),
                None => self.acknowledge(version, subscription_changed),
            },
            Some(_) => {
                // the outstanding push decides what happens next
                if subscription_changed || nonce.is_empty() {
                    self.pending_change = true;
                }
                trace!(type_url = %self.type_url, nonce, "request ignored while a push is outstanding");
                Decision::Hold(HoldReason::Outstanding)
            }
            None if nonce.is_empty() => {
                debug!(type_url = %self.type_url, "initial request");
                Decision::push(None)
            }
            None if request.is_nack() => {
                debug!(type_url = %self.type_url, nonce, "rejection of an old push ignored");
                Decision::Hold(HoldReason::StaleRejection)
            }
            None => self.reconnect(&request.version_info),
        }
    }

    /// A change that may affect this type happened.
    pub fn on_change(&mut self) -> Decision {
        match &self.state {
            SessionState::Uninitialized => Decision::Hold(HoldReason::NotSubscribed),
            SessionState::AwaitingAck { .. } => {
                self.pending_change = true;
                Decision::Hold(HoldReason::Outstanding)
            }
            SessionState::Accepted { version } => Decision::push(Some(version.clone())),
        }
    }

    /// Turn compiled resources into the response to send.
    ///
    /// Returns `None` when the push is redundant, or when a push is already
    /// outstanding (the change is then remembered as pending).
    pub fn build_push(
        &mut self,
        unless: Option<&ResourceVersion>,
        encoded: EncodedResources,
    ) -> Option<DiscoveryResponse> {
        if self.is_awaiting_ack() {
            self.pending_change = true;
            return None;
        }

        if !encoded.version.is_empty() && unless == Some(&encoded.version) {
            debug!(type_url = %self.type_url, version = %encoded.version, "push suppressed, version unchanged");
            self.accepted = encoded.version.clone();
            self.accepted_names = encoded.names;
            self.state = SessionState::Accepted {
                version: encoded.version,
            };
            self.pending_change = false;
            return None;
        }

        let nonce = generate_nonce();
        let version = encoded.version;
        self.outstanding_names = encoded.names;
        self.pending_change = false;
        self.pushes += 1;
        self.state = SessionState::AwaitingAck {
            nonce: nonce.clone(),
            version: version.clone(),
        };

        Some(DiscoveryResponse {
            version_info: version.into_inner(),
            resources: encoded.resources,
            canary: false,
            type_url: self.type_url.to_string(),
            nonce,
            control_plane: self.control_plane.clone().map(|identifier| ControlPlane { identifier }),
        })
    }

    /// Snapshot for admin dumps.
    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            type_url: self.type_url.to_string(),
            accepted_version: self.accepted.to_string(),
            outstanding_nonce: self.outstanding_nonce().map(str::to_string),
            pending_change: self.pending_change,
            pushes: self.pushes,
            rejections: self.rejections,
            last_rejection: self.last_rejection.clone(),
            resources: self.accepted_names.clone(),
            outstanding_resources: self.outstanding_names.clone(),
        }
    }

    fn acknowledge(&mut self, version: ResourceVersion, subscription_changed: bool) -> Decision {
        trace!(type_url = %self.type_url, version = %version, "push acknowledged");
        self.accepted = version.clone();
        self.accepted_names = std::mem::take(&mut self.outstanding_names);
        self.state = SessionState::Accepted {
            version: version.clone(),
        };
        if self.pending_change || subscription_changed {
            self.pending_change = false;
            Decision::push(Some(version))
        } else {
            Decision::Hold(HoldReason::Acknowledged)
        }
    }

    fn reject(&mut self, nonce: &str, version: &ResourceVersion, message: &str) -> Decision {
        warn!(
            type_url = %self.type_url,
            nonce,
            version = %version,
            accepted = %self.accepted,
            error = message,
            "push rejected"
        );
        self.rejections += 1;
        self.last_rejection = Some(Rejection {
            nonce: nonce.to_string(),
            version: version.to_string(),
            message: message.to_string(),
        });
        self.outstanding_names.clear();
        self.state = SessionState::Accepted {
            version: self.accepted.clone(),
        };
        Decision::Hold(HoldReason::Rejected)
    }

    fn reconnect(&mut self, reported: &str) -> Decision {
        let reported = ResourceVersion::new(reported);
        match &self.state {
            SessionState::Accepted { version } if !version.is_empty() && *version == reported => {
                debug!(type_url = %self.type_url, version = %reported, "proxy already up to date");
                Decision::Hold(HoldReason::UpToDate)
            }
            _ => {
                debug!(type_url = %self.type_url, version = %reported, "reconnect probe");
                Decision::push((!reported.is_empty()).then_some(reported))
            }
        }
    }

    fn update_subscription(&mut self, names: &[String]) -> bool {
        let mut names = names.to_vec();
        names.sort();
        names.dedup();
        if names == self.subscription {
            return false;
        }
        self.subscription = names;
        true
    }
}
