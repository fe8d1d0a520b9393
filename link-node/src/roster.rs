//! # Group State Replica
//!
//! [`Roster`] is this node's copy of the group: identity, timestamp and the members keyed by ip.
//! It knows nothing about the network. Heartbeats, the handshake and inbound requests share one
//! roster through [`SharedRoster`].

use crate::config::Peer;
use link_protocol::{MemberStatus, Timestamp};
use std::{
    collections::BTreeMap,
    fmt::Display,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

/// Descriptive fields a node announces about itself
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HostDetails {
    pub platform: String,
    pub os_version: String,
    pub host_description: String,
    pub api_version: String,
}

/// A group member.
///
/// Members learned from a group definition are *bare*: only ip and port are known.
/// Name and details arrive once the member describes itself in a heartbeat reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub ip: String,
    pub port: u16,
    pub name: Option<String>,
    pub details: Option<HostDetails>,
    /// Outcome of the latest probe, never part of a roster listing
    pub connected: bool,
}

impl Member {
    #[must_use]
    pub fn bare(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
            name: None,
            details: None,
            connected: false,
        }
    }

    #[must_use]
    pub fn full(
        ip: impl Into<String>,
        port: u16,
        name: impl Into<String>,
        details: HostDetails,
    ) -> Self {
        Self {
            ip: ip.into(),
            port,
            name: Some(name.into()),
            details: Some(details),
            connected: false,
        }
    }

    #[must_use]
    pub fn is_bare(&self) -> bool {
        self.name.is_none() && self.details.is_none()
    }

    #[must_use]
    pub fn peer(&self) -> Peer {
        Peer::new(self.ip.clone(), self.port)
    }
}

impl From<MemberStatus> for Member {
    fn from(status: MemberStatus) -> Self {
        let MemberStatus {
            ip,
            port,
            name,
            platform,
            os_version,
            host_description,
            api_version,
            connected,
        } = status;
        let details = if platform.is_some()
            || os_version.is_some()
            || host_description.is_some()
            || api_version.is_some()
        {
            Some(HostDetails {
                platform: platform.unwrap_or_default(),
                os_version: os_version.unwrap_or_default(),
                host_description: host_description.unwrap_or_default(),
                api_version: api_version.unwrap_or_default(),
            })
        } else {
            None
        };
        Self {
            ip,
            port,
            name,
            details,
            connected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roster {
    me: Member,
    secret: String,
    name: String,
    timestamp: Option<Timestamp>,
    members: BTreeMap<String, Member>,
}

impl Roster {
    /// Empty roster of a node that still has to join a group
    #[must_use]
    pub fn new(me: Member) -> Self {
        Self {
            me: Member {
                connected: false,
                ..me
            },
            secret: String::new(),
            name: String::new(),
            timestamp: None,
            members: BTreeMap::new(),
        }
    }

    /// Roster of a node that founds its own group and waits for others to join
    #[must_use]
    pub fn standalone(me: Member, group_name: impl Into<String>) -> Self {
        let mut roster = Self::new(me);
        roster.name = group_name.into();
        roster.timestamp = Some(Timestamp::now());
        roster.mark_joined();
        roster
    }

    #[must_use]
    pub fn me(&self) -> &Member {
        &self.me
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }

    #[must_use]
    pub fn timestamp(&self) -> Option<&Timestamp> {
        self.timestamp.as_ref()
    }

    #[must_use]
    pub fn member(&self, ip: &str) -> Option<&Member> {
        self.members.get(ip)
    }

    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Whether the group lists a member with this ip
    #[must_use]
    pub fn is_member(&self, ip: &str) -> bool {
        self.members.contains_key(ip)
    }

    /// Whether this node participates in a group, either joined or standalone
    #[must_use]
    pub fn is_joined(&self) -> bool {
        self.me.connected && self.is_member(&self.me.ip)
    }

    /// Every member except this node
    #[must_use]
    pub fn peers(&self) -> Vec<Peer> {
        self.members
            .values()
            .filter(|member| member.ip != self.me.ip)
            .map(Member::peer)
            .collect()
    }

    /// Inserts a bare entry unless the ip is already known. Returns whether it was inserted.
    pub fn insert_bare(&mut self, ip: &str, port: u16) -> bool {
        if ip.is_empty() || self.is_member(ip) {
            return false;
        }
        self.members.insert(ip.to_string(), Member::bare(ip, port));
        true
    }

    /// Inserts `member`, replacing whatever was known about its ip
    pub fn upsert(&mut self, member: Member) {
        self.members.insert(member.ip.clone(), member);
    }

    /// Records a probe outcome. Returns `false` for unknown members.
    pub fn set_connected(&mut self, ip: &str, connected: bool) -> bool {
        match self.members.get_mut(ip) {
            Some(member) => {
                member.connected = connected;
                true
            }
            None => false,
        }
    }

    pub fn set_identity(&mut self, secret: &str, name: &str) {
        secret.clone_into(&mut self.secret);
        name.clone_into(&mut self.name);
    }

    /// Keeps the first timestamp ever seen
    pub fn adopt_timestamp(&mut self, timestamp: Timestamp) {
        self.timestamp.get_or_insert(timestamp);
    }

    /// Marks this node as participating and lists its full record in the group
    pub fn mark_joined(&mut self) {
        self.me.connected = true;
        self.upsert(self.me.clone());
    }
}

/// The roster shared between request handling, heartbeats and the handshake.
///
/// Every mutation happens under one mutex. Guards must be dropped before awaiting.
#[derive(Debug, Clone)]
pub struct SharedRoster(Arc<Mutex<Roster>>);

impl SharedRoster {
    #[must_use]
    pub fn new(roster: Roster) -> Self {
        Self(Arc::new(Mutex::new(roster)))
    }

    pub fn lock(&self) -> MutexGuard<'_, Roster> {
        // Updates are single map operations, a poisoned roster is still consistent
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn snapshot(&self) -> Roster {
        self.lock().clone()
    }
}

impl Display for Roster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let title = format!(
            "LINK: {} ({} members), listening on {}:{}",
            if self.name.is_empty() {
                "<no group>"
            } else {
                self.name.as_str()
            },
            self.members.len(),
            self.me.ip,
            self.me.port,
        );
        let mut hline = title.chars().map(|_| '-').collect::<String>();
        hline = format!("\x1B[90m{hline}\x1B[0m");
        writeln!(f, "{hline}\n{title}\n")?;

        for member in self.members.values() {
            let indicator = if member.ip == self.me.ip { " me " } else { " •  " };
            let color = if member.connected { "\x1B[32m" } else { "\x1B[31m" };
            writeln!(
                f,
                "{color}{indicator}\x1B[0m {} - {}:{}",
                member.name.as_deref().unwrap_or("?"),
                member.ip,
                member.port,
            )?;
        }

        writeln!(f, "{hline}")
    }
}
