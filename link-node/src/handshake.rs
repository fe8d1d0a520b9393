//! # Joining a Group
//!
//! A node that starts with a bootstrap peer joins that peer's group:
//!
//! 1. `GET /group/status` on the bootstrap peer and merge the reply
//! 2. If the group lists our ip already we're done (reconnect after a restart)
//! 3. Otherwise `POST /group/add_member` with our ip and port and merge the reply
//! 4. The group must now list our ip, else the peer rejected us
//!
//! Jump to [`Handshake::run`].

use crate::{
    config::Peer,
    console::Report,
    roster::{Roster, SharedRoster},
    transport::{Transport, TransportError},
};
use link_protocol::{AdmissionRequest, DecodeJson, Envelope, Request};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("Bootstrap peer didn't answer the status query")]
    StatusQuery(#[source] TransportError),
    #[error("Bootstrap peer didn't answer the admission request")]
    Admission(#[source] TransportError),
    #[error("Peer {peer} didn't admit {ip} into group \"{group}\"")]
    AdmissionRejected {
        peer: Peer,
        ip: String,
        group: String,
    },
}

/// How the node ended up in the group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Joined {
    /// The group listed us before we asked
    AlreadyMember,
    Admitted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    AwaitingStatus,
    AwaitingAdmission,
    Joined(Joined),
    Failed,
}

impl HandshakeState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Joined(_) | Self::Failed)
    }
}

/// One join attempt against a bootstrap peer
pub struct Handshake<'a, T> {
    transport: &'a T,
    roster: &'a SharedRoster,
    bootstrap: Peer,
    state: HandshakeState,
}

impl<'a, T: Transport> Handshake<'a, T> {
    pub fn new(transport: &'a T, roster: &'a SharedRoster, bootstrap: Peer) -> Self {
        Self {
            transport,
            roster,
            bootstrap,
            state: HandshakeState::Idle,
        }
    }

    #[must_use]
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Drives the attempt to a terminal state.
    ///
    /// On success our full record is listed in the roster and marked connected.
    /// The returned result and [`Handshake::state`] agree on the outcome.
    pub async fn run(&mut self) -> Result<Joined, HandshakeError> {
        let result = self.join().await;
        self.transition(match &result {
            Ok(joined) => HandshakeState::Joined(*joined),
            Err(_) => HandshakeState::Failed,
        });
        result
    }

    fn transition(&mut self, state: HandshakeState) {
        debug!("Handshake with {}: {:?} -> {state:?}", self.bootstrap, self.state);
        self.state = state;
    }

    async fn join(&mut self) -> Result<Joined, HandshakeError> {
        info!("Attempting to connect to {}", self.bootstrap);
        self.transition(HandshakeState::AwaitingStatus);
        let body = self
            .transport
            .send(&self.bootstrap, &Request::Status)
            .await
            .map_err(HandshakeError::StatusQuery)?;
        info!("Host {} is alive", self.bootstrap);

        let me = {
            let mut roster = self.roster.lock();
            self.merge_reply(&mut roster, &body);
            let me = roster.me().clone();
            if roster.is_member(&me.ip) {
                roster.mark_joined();
                info!("Group \"{}\" already lists {}", roster.name(), me.ip);
                return Ok(Joined::AlreadyMember);
            }
            info!("Asking to join group \"{}\"", roster.name());
            me
        };

        self.transition(HandshakeState::AwaitingAdmission);
        let request = Request::AddMember(AdmissionRequest::new(me.ip.clone(), me.port));
        let body = self
            .transport
            .send(&self.bootstrap, &request)
            .await
            .map_err(HandshakeError::Admission)?;

        let mut roster = self.roster.lock();
        self.merge_reply(&mut roster, &body);
        if roster.is_member(&me.ip) {
            roster.mark_joined();
            info!("Joined group \"{}\"", roster.name());
            Ok(Joined::Admitted)
        } else {
            Err(HandshakeError::AdmissionRejected {
                peer: self.bootstrap.clone(),
                ip: me.ip,
                group: roster.name().to_string(),
            })
        }
    }

    fn merge_reply(&self, roster: &mut Roster, body: &[u8]) {
        match Envelope::decode(body) {
            Ok(envelope) => {
                let added = roster.merge(&envelope);
                debug!("{} listed {added} new members", self.bootstrap);
            }
            Err(e) => warn!("Ignoring reply of {}: {}", self.bootstrap, Report(&e)),
        }
    }
}
