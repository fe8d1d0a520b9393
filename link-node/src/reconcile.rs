//! # Roster Reconciliation
//!
//! Folds what a peer reports into the local [`Roster`]. See [`Roster::merge`].

use crate::roster::{Member, Roster};
use link_protocol::Envelope;

impl Roster {
    /// Merges a peer's envelope into this roster.
    ///
    /// 1. The peer's group secret and name replace ours, and its timestamp is adopted if we have none.
    /// 2. Listed members we don't know yet are added as bare, disconnected entries.
    ///    Known members are left untouched, whatever the peer lists for them.
    /// 3. A `status` (heartbeat replies only) replaces the entry of the member it describes,
    ///    connectivity included. Callers probing that member set its connectivity afterwards.
    ///
    /// Members are never removed. Returns the number of members added in step 2.
    pub fn merge(&mut self, incoming: &Envelope) -> usize {
        let mut added = 0;

        if let Some(group) = &incoming.group_definition {
            self.set_identity(&group.secret, &group.name);
            if let Some(timestamp) = &group.timestamp {
                self.adopt_timestamp(timestamp.clone());
            }
            for member in &group.members {
                if self.insert_bare(&member.ip, member.port) {
                    added += 1;
                }
            }
        }

        if let Some(status) = &incoming.status {
            if !status.ip.is_empty() {
                self.upsert(Member::from(status.clone()));
            }
        }

        added
    }
}
