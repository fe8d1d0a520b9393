#![deny(clippy::unwrap_used, clippy::allow_attributes_without_reason)]
#![warn(clippy::perf, clippy::complexity, clippy::pedantic, clippy::suspicious)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    reason = "We're not going to write comprehensive docs"
)]

//! This crate defines the JSON envelopes of the Network Link protocol.
//!
//! Three operations exist, all carried over plain HTTP:
//! - `GET /group/status` answered with a [`StatusEnvelope`]
//! - `GET /heartbeat?port=N` answered with a [`StatusEnvelope`] that also carries a `status`
//! - `POST /group/add_member` with an [`AdmissionRequest`], answered with an [`AdmissionEnvelope`]
//!
//! Replies to `/group/add_member` spell the group definition key as `GroupDefinition`, while the
//! other replies use `group_definition`. Both decode into the same [`Envelope`].

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::{
    fmt::Display,
    time::{SystemTime, UNIX_EPOCH},
};
use thiserror::Error;

pub const STATUS_PATH: &str = "/group/status";
pub const HEARTBEAT_PATH: &str = "/heartbeat";
pub const ADD_MEMBER_PATH: &str = "/group/add_member";

/// Group timestamp, usually `{"seconds": .., "nanos": ..}`.
///
/// Nodes carry it around but never interpret it, any JSON value a peer sends is kept as is.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(transparent)]
pub struct Timestamp(pub Value);

impl Timestamp {
    #[must_use]
    pub fn new(seconds: u64, nanos: u32) -> Self {
        Self(json!({ "seconds": seconds, "nanos": nanos }))
    }

    /// Wall-clock time with millisecond precision, the way peers stamp new groups.
    #[must_use]
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self::new(since_epoch.as_secs(), since_epoch.subsec_millis() * 1_000_000)
    }
}

/// Roster entry as listed in a group definition
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MemberAddress {
    pub ip: String,
    #[serde(default)]
    pub port: u16,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct GroupDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub members: Vec<MemberAddress>,
}

/// Full self-description of a node, sent back in heartbeat replies
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct MemberStatus {
    pub ip: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(default)]
    pub connected: bool,
}

/// Any reply of a peer, normalized.
///
/// Every field is optional, an empty JSON object decodes to an envelope without data.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct Envelope {
    #[serde(default, alias = "GroupDefinition")]
    pub group_definition: Option<GroupDefinition>,
    #[serde(default)]
    pub member_name: Option<String>,
    #[serde(default)]
    pub status: Option<MemberStatus>,
}

/// Reply to status queries and heartbeats
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct StatusEnvelope {
    pub group_definition: GroupDefinition,
    pub member_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<MemberStatus>,
}

/// Reply to admission requests
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct AdmissionEnvelope {
    #[serde(rename = "GroupDefinition")]
    pub group_definition: GroupDefinition,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Candidate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default)]
    pub port: u16,
}

/// Body of `POST /group/add_member`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct AdmissionRequest {
    #[serde(rename = "GroupMember")]
    pub group_member: Candidate,
}

impl AdmissionRequest {
    #[must_use]
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            group_member: Candidate {
                ip: Some(ip.into()),
                port,
            },
        }
    }

    /// The member asking to be admitted, if the request names one.
    /// An empty ip counts as no ip.
    #[must_use]
    pub fn candidate(&self) -> Option<MemberAddress> {
        match &self.group_member.ip {
            Some(ip) if !ip.is_empty() => Some(MemberAddress {
                ip: ip.clone(),
                port: self.group_member.port,
            }),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
#[error("Malformed JSON body")]
pub struct MalformedBody(#[from] serde_json::Error);

#[derive(Error, Debug)]
#[error("Failed to encode JSON body")]
pub struct EncodeError(#[from] serde_json::Error);

pub trait DecodeJson: Sized + DeserializeOwned {
    /// # Decode a message from an HTTP body
    fn decode(body: &[u8]) -> Result<Self, MalformedBody> {
        Ok(serde_json::from_slice(body)?)
    }
}

pub trait EncodeJson: Serialize {
    /// # Encode self into an HTTP body
    fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl DecodeJson for Envelope {}
impl DecodeJson for AdmissionRequest {}
impl EncodeJson for StatusEnvelope {}
impl EncodeJson for AdmissionEnvelope {}
impl EncodeJson for AdmissionRequest {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// The three protocol operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Status,
    Heartbeat,
    AddMember,
}

impl Operation {
    #[must_use]
    pub fn from_path(path: &str) -> Option<Self> {
        match path {
            STATUS_PATH => Some(Self::Status),
            HEARTBEAT_PATH => Some(Self::Heartbeat),
            ADD_MEMBER_PATH => Some(Self::AddMember),
            _ => None,
        }
    }

    #[must_use]
    pub fn path(self) -> &'static str {
        match self {
            Self::Status => STATUS_PATH,
            Self::Heartbeat => HEARTBEAT_PATH,
            Self::AddMember => ADD_MEMBER_PATH,
        }
    }
}

/// An outgoing request to a peer
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Request {
    Status,
    /// `port` is the listening port of the sender
    Heartbeat { port: u16 },
    AddMember(AdmissionRequest),
}

impl Request {
    #[must_use]
    pub fn operation(&self) -> Operation {
        match self {
            Self::Status => Operation::Status,
            Self::Heartbeat { .. } => Operation::Heartbeat,
            Self::AddMember(_) => Operation::AddMember,
        }
    }

    #[must_use]
    pub fn method(&self) -> Method {
        match self {
            Self::Status | Self::Heartbeat { .. } => Method::Get,
            Self::AddMember(_) => Method::Post,
        }
    }

    #[must_use]
    pub fn path_and_query(&self) -> String {
        match self {
            Self::Heartbeat { port } => format!("{HEARTBEAT_PATH}?port={port}"),
            _ => self.operation().path().to_string(),
        }
    }

    pub fn body(&self) -> Result<Option<Vec<u8>>, EncodeError> {
        match self {
            Self::AddMember(request) => request.encode().map(Some),
            Self::Status | Self::Heartbeat { .. } => Ok(None),
        }
    }
}

impl Display for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let method = match self.method() {
            Method::Get => "GET",
            Method::Post => "POST",
        };
        write!(f, "{method} {}", self.path_and_query())
    }
}
