use crate::{
    config::Config,
    console,
    handler::RequestHandler,
    handshake::{Handshake, HandshakeError},
    heartbeat::Heartbeat,
    roster::{Roster, SharedRoster},
    transport::{HttpTransport, Transport},
};
use axum::{
    body::Bytes,
    extract::State,
    http::{header, Uri},
    response::IntoResponse,
    Router,
};
use std::{io, sync::Arc};
use thiserror::Error;
use tokio::{net::TcpListener, task::JoinError};
use tracing::info;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Can't build the HTTP client")]
    Client(#[from] reqwest::Error),
    #[error("Can't join the group")]
    Handshake(#[from] HandshakeError),
    #[error("HTTP server failed")]
    Serve(#[source] io::Error),
    #[error("Task ended abnormally")]
    Task(#[from] JoinError),
    #[error("Heartbeat engine stopped")]
    HeartbeatStopped,
}

/// A Network Link node
pub struct Node<T> {
    config: Arc<Config>,
    roster: SharedRoster,
    transport: Arc<T>,
}

impl Node<HttpTransport> {
    pub fn new(config: Config) -> Result<Self, NodeError> {
        let transport = HttpTransport::new(config.request_timeout)?;
        Ok(Self::with_transport(config, transport))
    }
}

impl<T: Transport> Node<T> {
    /// Initialize the roster: empty when a bootstrap peer is configured, self-seeded otherwise.
    pub fn with_transport(config: Config, transport: T) -> Self {
        let roster = match &config.bootstrap {
            Some(_) => Roster::new(config.me.clone()),
            None => Roster::standalone(config.me.clone(), config.group_name.clone()),
        };
        Self {
            config: Arc::new(config),
            roster: SharedRoster::new(roster),
            transport: Arc::new(transport),
        }
    }

    #[must_use]
    pub fn roster(&self) -> &SharedRoster {
        &self.roster
    }

    /// Routes every path to the [`RequestHandler`], replies are always `200 OK`
    pub fn router(&self) -> Router {
        let handler = RequestHandler::new(self.roster.clone(), self.config.log_heartbeats);
        Router::new()
            .fallback(dispatch)
            .with_state(Arc::new(handler))
    }

    /// Serve peers on `listener`, join the bootstrap peer's group if configured, then send
    /// heartbeats until the server stops.
    ///
    /// Returns early with [`NodeError::Handshake`] if joining fails, there is no group to fall back to.
    /// A panicking heartbeat engine stops the server and returns [`NodeError::Task`].
    pub async fn start(self, listener: TcpListener) -> Result<(), NodeError> {
        let app = self.router();
        let mut server = tokio::spawn(async move { axum::serve(listener, app).await });

        match &self.config.bootstrap {
            Some(bootstrap) => {
                let mut handshake =
                    Handshake::new(self.transport.as_ref(), &self.roster, bootstrap.clone());
                if let Err(e) = handshake.run().await {
                    server.abort();
                    return Err(e.into());
                }
                info!("Connected to group \"{}\"", self.roster.lock().name());
                info!("Listening to events and sending heartbeats");
            }
            None => {
                let me = self.roster.lock().me().clone();
                info!("Waiting for Network Link requests on {}:{}", me.ip, me.port);
            }
        }
        console::update_state(self.roster.snapshot().to_string());

        let heartbeat = Arc::new(Heartbeat::new(
            Arc::clone(&self.transport),
            self.roster.clone(),
            self.config.heartbeat_interval,
            self.config.log_heartbeats,
        ));
        let mut heartbeat = tokio::spawn(heartbeat.run());

        // Whichever task ends first takes the node down
        let result = tokio::select! {
            served = &mut server => match served {
                Ok(served) => served.map_err(NodeError::Serve),
                Err(e) => Err(e.into()),
            },
            ended = &mut heartbeat => {
                Err(ended.err().map_or(NodeError::HeartbeatStopped, NodeError::Task))
            }
        };
        server.abort();
        heartbeat.abort();
        result
    }
}

async fn dispatch(
    State(handler): State<Arc<RequestHandler>>,
    uri: Uri,
    body: Bytes,
) -> impl IntoResponse {
    let reply = handler.handle(uri.path(), &body);
    (
        [
            (header::ACCEPT, "*/*"),
            (header::CONTENT_TYPE, "application/json"),
        ],
        reply.unwrap_or_default(),
    )
}
