//! # Inbound Protocol Operations
//!
//! [`RequestHandler::handle`] answers a request given its path and body. It never fails:
//! unknown paths and unusable bodies get an empty reply.

use crate::{
    console::{self, Report},
    roster::{Member, SharedRoster},
};
use link_protocol::{AdmissionRequest, DecodeJson, EncodeError, EncodeJson, Operation};
use tracing::{debug, error, info};

pub struct RequestHandler {
    roster: SharedRoster,
    log_heartbeats: bool,
}

impl RequestHandler {
    #[must_use]
    pub fn new(roster: SharedRoster, log_heartbeats: bool) -> Self {
        Self {
            roster,
            log_heartbeats,
        }
    }

    /// Returns the reply body, `None` when there is nothing to send back
    pub fn handle(&self, path: &str, body: &[u8]) -> Option<Vec<u8>> {
        let operation = Operation::from_path(path);
        let result = match operation {
            Some(Operation::Status) => self.status().map(Some),
            Some(Operation::Heartbeat) => self.heartbeat().map(Some),
            Some(Operation::AddMember) => self.add_member(body),
            None => Ok(None),
        };
        let reply = result
            .inspect_err(|e| error!("Can't encode reply to {path}: {}", Report(e)))
            .ok()
            .flatten();

        if operation != Some(Operation::Heartbeat) || self.log_heartbeats {
            info!("Event: {path} {}", String::from_utf8_lossy(body));
            if let Some(reply) = &reply {
                info!("Sending reply: {}", String::from_utf8_lossy(reply));
            }
        }
        console::update_state(self.roster.snapshot().to_string());

        reply
    }

    fn status(&self) -> Result<Vec<u8>, EncodeError> {
        self.roster.lock().status_envelope(false).encode()
    }

    fn heartbeat(&self) -> Result<Vec<u8>, EncodeError> {
        self.roster.lock().status_envelope(true).encode()
    }

    fn add_member(&self, body: &[u8]) -> Result<Option<Vec<u8>>, EncodeError> {
        let candidate = match AdmissionRequest::decode(body) {
            Ok(request) => request.candidate(),
            Err(e) => {
                debug!("Unusable admission request: {}", Report(&e));
                None
            }
        };
        let Some(candidate) = candidate else {
            return Ok(None);
        };

        let mut roster = self.roster.lock();
        roster.upsert(Member::bare(candidate.ip, candidate.port));
        roster.admission_envelope().encode().map(Some)
    }
}
