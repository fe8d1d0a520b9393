//! # Outgoing Requests
//!
//! The handshake and the heartbeat engine talk to peers through the [`Transport`] trait, which
//! sends one [`Request`] and hands back the raw reply body. [`HttpTransport`] is the real
//! implementation on top of [`reqwest`].

use crate::config::Peer;
use async_trait::async_trait;
use link_protocol::{Method, Request};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::{error::Error, io, time::Duration};
use thiserror::Error;

pub type BoxError = Box<dyn Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Peer {peer} refused the connection")]
    Unreachable {
        peer: Peer,
        #[source]
        source: BoxError,
    },
    #[error("Request to peer {peer} failed")]
    Other {
        peer: Peer,
        #[source]
        source: BoxError,
    },
}

impl TransportError {
    /// Sorts a failure by its cause, connection refused anywhere in the chain means unreachable.
    pub fn classify(peer: &Peer, error: impl Into<BoxError>) -> Self {
        let source = error.into();
        let peer = peer.clone();
        if is_connection_refused(source.as_ref()) {
            Self::Unreachable { peer, source }
        } else {
            Self::Other { peer, source }
        }
    }

    #[must_use]
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable { .. })
    }
}

fn is_connection_refused(error: &(dyn Error + 'static)) -> bool {
    let mut cause = Some(error);
    while let Some(error) = cause {
        if let Some(io_error) = error.downcast_ref::<io::Error>() {
            if io_error.kind() == io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        cause = error.source();
    }
    false
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends `request` to `peer` and returns the reply body
    async fn send(&self, peer: &Peer, request: &Request) -> Result<Vec<u8>, TransportError>;
}

/// Plain HTTP/1.1 client
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// `timeout` bounds every request, from connecting to reading the full body
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, peer: &Peer, request: &Request) -> Result<Vec<u8>, TransportError> {
        let url = format!("http://{peer}{}", request.path_and_query());
        let body = request
            .body()
            .map_err(|e| TransportError::classify(peer, e))?;

        let builder = match request.method() {
            Method::Get => self.client.get(&url),
            Method::Post => self
                .client
                .post(&url)
                .header(ACCEPT, "*/*")
                .header(CONTENT_TYPE, "application/json")
                .body(body.unwrap_or_default()),
        };

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::classify(peer, e))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::classify(peer, e))?;
        Ok(bytes.to_vec())
    }
}
