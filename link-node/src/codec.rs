//! Translation of the roster into the wire envelopes of [`link_protocol`].

use crate::roster::{Member, Roster};
use link_protocol::{
    AdmissionEnvelope, GroupDefinition, MemberAddress, MemberStatus, StatusEnvelope, Timestamp,
};

impl Member {
    #[must_use]
    pub fn address(&self) -> MemberAddress {
        MemberAddress {
            ip: self.ip.clone(),
            port: self.port,
        }
    }

    /// Full self-description as sent in heartbeat replies
    #[must_use]
    pub fn status(&self) -> MemberStatus {
        let details = self.details.clone().unwrap_or_default();
        let known = self.details.is_some();
        MemberStatus {
            ip: self.ip.clone(),
            port: self.port,
            name: self.name.clone(),
            platform: known.then_some(details.platform),
            os_version: known.then_some(details.os_version),
            host_description: known.then_some(details.host_description),
            api_version: known.then_some(details.api_version),
            connected: self.connected,
        }
    }
}

impl Roster {
    /// Group definition listing every member by address.
    /// A group that never received a timestamp is stamped with the current time.
    #[must_use]
    pub fn group_definition(&self) -> GroupDefinition {
        GroupDefinition {
            timestamp: Some(self.timestamp().cloned().unwrap_or_else(Timestamp::now)),
            secret: self.secret().to_string(),
            name: self.name().to_string(),
            members: self.members().map(Member::address).collect(),
        }
    }

    /// Reply to a status query, or to a heartbeat when `with_status` is set
    #[must_use]
    pub fn status_envelope(&self, with_status: bool) -> StatusEnvelope {
        StatusEnvelope {
            group_definition: self.group_definition(),
            member_name: self.me().name.clone().unwrap_or_default(),
            status: with_status.then(|| self.me().status()),
        }
    }

    #[must_use]
    pub fn admission_envelope(&self) -> AdmissionEnvelope {
        AdmissionEnvelope {
            group_definition: self.group_definition(),
        }
    }
}
