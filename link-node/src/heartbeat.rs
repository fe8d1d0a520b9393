//! # Heartbeat Engine
//!
//! Every heartbeat interval each peer in the roster gets a `GET /heartbeat`. Replies are merged
//! into the roster and mark the peer connected, a refused connection marks it disconnected.
//! Any other failure is only logged.
//!
//! Ticks don't wait for each other, a slow probe may still be pending when the next tick fires.

use crate::{
    config::Peer,
    console::{self, Report},
    roster::SharedRoster,
    transport::Transport,
};
use futures::future::join_all;
use link_protocol::{DecodeJson, Envelope, Request};
use std::{sync::Arc, time::Duration};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// Result of probing one peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Alive,
    Refused,
    /// Timeouts, name resolution and other transport errors
    Failed,
    /// The peer answered with something that isn't an envelope
    Malformed,
}

pub struct Heartbeat<T> {
    transport: Arc<T>,
    roster: SharedRoster,
    interval: Duration,
    log_replies: bool,
}

impl<T: Transport> Heartbeat<T> {
    pub fn new(
        transport: Arc<T>,
        roster: SharedRoster,
        interval: Duration,
        log_replies: bool,
    ) -> Self {
        Self {
            transport,
            roster,
            interval,
            log_replies,
        }
    }

    /// Ticks forever, spawning each tick as its own task
    pub async fn run(self: Arc<Self>) {
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            tokio::spawn(Arc::clone(&self).tick());
        }
    }

    /// Probes every peer concurrently and waits for all outcomes
    pub async fn tick(self: Arc<Self>) -> Vec<(Peer, ProbeOutcome)> {
        let (peers, request) = {
            let roster = self.roster.lock();
            (
                roster.peers(),
                Request::Heartbeat {
                    port: roster.me().port,
                },
            )
        };
        trace!("Sending heartbeats to {} peers", peers.len());

        let outcomes = join_all(peers.into_iter().map(|peer| {
            let request = &request;
            let this = &self;
            async move {
                let outcome = this.probe(&peer, request).await;
                (peer, outcome)
            }
        }))
        .await;

        console::update_state(self.roster.snapshot().to_string());
        outcomes
    }

    async fn probe(&self, peer: &Peer, request: &Request) -> ProbeOutcome {
        match self.transport.send(peer, request).await {
            Ok(body) => match Envelope::decode(&body) {
                Ok(envelope) => {
                    if self.log_replies {
                        info!("Heartbeat reply from {peer}: {envelope:?}");
                    }
                    let mut roster = self.roster.lock();
                    roster.merge(&envelope);
                    // After the merge, the peer's own status can't know we just reached it
                    roster.set_connected(&peer.host, true);
                    ProbeOutcome::Alive
                }
                Err(e) => {
                    warn!("Heartbeat reply of {peer} ignored: {}", Report(&e));
                    ProbeOutcome::Malformed
                }
            },
            Err(e) if e.is_unreachable() => {
                debug!("{peer} is unreachable");
                self.roster.lock().set_connected(&peer.host, false);
                ProbeOutcome::Refused
            }
            Err(e) => {
                warn!("Heartbeat to {peer} failed: {}", Report(&e));
                ProbeOutcome::Failed
            }
        }
    }
}
