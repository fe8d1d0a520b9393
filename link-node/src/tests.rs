//! This is the main tests module for the node, with a mock implementation of [`Transport`]
//! scripted per peer, and end-to-end tests over loopback HTTP.

#![cfg(test)]

use crate::{
    config::{Config, Peer},
    handshake::{Handshake, HandshakeError, HandshakeState, Joined},
    heartbeat::{Heartbeat, ProbeOutcome},
    roster::{HostDetails, Member, Roster, SharedRoster},
    transport::{HttpTransport, Transport, TransportError},
    Node,
};
use async_trait::async_trait;
use link_protocol::{AdmissionRequest, Request};
use serde_json::{json, Value};
use std::{
    collections::{HashMap, VecDeque},
    io,
    sync::{Arc, Mutex},
    time::Duration,
};

enum Reply {
    Body(Vec<u8>),
    /// Body sent after a delay
    Slow(Duration, Vec<u8>),
    Refused,
    TimedOut,
}

/// Replies with whatever was scripted for a peer, in order.
/// Peers without (remaining) replies refuse the connection.
#[derive(Default)]
struct MockTransport {
    replies: Mutex<HashMap<Peer, VecDeque<Reply>>>,
    sent: Mutex<Vec<(Peer, Request)>>,
}

impl MockTransport {
    fn push_reply(&self, peer: &Peer, reply: Reply) {
        self.replies
            .lock()
            .unwrap()
            .entry(peer.clone())
            .or_default()
            .push_back(reply);
    }

    fn push_json(&self, peer: &Peer, value: &Value) {
        self.push_reply(peer, Reply::Body(serde_json::to_vec(value).unwrap()));
    }

    fn sent(&self) -> Vec<(Peer, Request)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, peer: &Peer, request: &Request) -> Result<Vec<u8>, TransportError> {
        self.sent
            .lock()
            .unwrap()
            .push((peer.clone(), request.clone()));
        let reply = self
            .replies
            .lock()
            .unwrap()
            .get_mut(peer)
            .and_then(VecDeque::pop_front);
        match reply {
            Some(Reply::Body(body)) => Ok(body),
            Some(Reply::Slow(delay, body)) => {
                tokio::time::sleep(delay).await;
                Ok(body)
            }
            Some(Reply::TimedOut) => Err(TransportError::classify(
                peer,
                io::Error::new(io::ErrorKind::TimedOut, "Mock timeout"),
            )),
            Some(Reply::Refused) | None => Err(TransportError::classify(
                peer,
                io::Error::new(io::ErrorKind::ConnectionRefused, "Connection refused by peer"),
            )),
        }
    }
}

fn details() -> HostDetails {
    HostDetails {
        platform: "mac".into(),
        os_version: "10.15.6".into(),
        host_description: "ProPresenter 7.8".into(),
        api_version: String::new(),
    }
}

fn me() -> Member {
    Member::full("127.0.0.1", 60000, "masquerader", details())
}

fn bootstrap() -> Peer {
    Peer::new("192.168.10.50", 60157)
}

fn group_status(members: &[(&str, u16)]) -> Value {
    json!({
        "group_definition": {
            "timestamp": { "seconds": 1_647_033_165, "nanos": 85_736_000 },
            "secret": "",
            "name": "LCC Primary",
            "members": members
                .iter()
                .map(|(ip, port)| json!({ "ip": ip, "port": port }))
                .collect::<Vec<_>>(),
        },
        "member_name": "paul"
    })
}

fn admission(members: &[(&str, u16)]) -> Value {
    json!({ "GroupDefinition": group_status(members)["group_definition"] })
}

#[tokio::test]
async fn handshake_with_known_member_skips_admission() {
    let transport = MockTransport::default();
    transport.push_json(
        &bootstrap(),
        &group_status(&[("192.168.10.50", 60157), ("127.0.0.1", 60000)]),
    );
    let roster = SharedRoster::new(Roster::new(me()));

    let mut handshake = Handshake::new(&transport, &roster, bootstrap());
    assert_eq!(handshake.state(), HandshakeState::Idle);
    let joined = handshake.run().await.unwrap();

    assert_eq!(joined, Joined::AlreadyMember);
    assert_eq!(handshake.state(), HandshakeState::Joined(Joined::AlreadyMember));
    assert!(handshake.state().is_terminal());
    assert_eq!(transport.sent(), vec![(bootstrap(), Request::Status)]);

    let roster = roster.snapshot();
    assert!(roster.is_joined());
    assert_eq!(roster.name(), "LCC Primary");
    assert_eq!(roster.member("127.0.0.1").unwrap().name.as_deref(), Some("masquerader"));
}

#[tokio::test]
async fn handshake_requests_admission() {
    let transport = MockTransport::default();
    transport.push_json(
        &bootstrap(),
        &group_status(&[("192.168.10.50", 60157), ("192.168.50.11", 60157)]),
    );
    transport.push_json(
        &bootstrap(),
        &admission(&[
            ("192.168.10.50", 60157),
            ("192.168.50.11", 60157),
            ("127.0.0.1", 60000),
        ]),
    );
    let roster = SharedRoster::new(Roster::new(me()));

    let mut handshake = Handshake::new(&transport, &roster, bootstrap());
    let joined = handshake.run().await.unwrap();

    assert_eq!(joined, Joined::Admitted);
    assert_eq!(
        transport.sent(),
        vec![
            (bootstrap(), Request::Status),
            (
                bootstrap(),
                Request::AddMember(AdmissionRequest::new("127.0.0.1", 60000))
            ),
        ]
    );

    let roster = roster.snapshot();
    assert_eq!(roster.len(), 3);
    let listed_me = roster.member("127.0.0.1").unwrap();
    assert!(listed_me.connected);
    assert_eq!(listed_me.details, Some(details()));
    let other = roster.member("192.168.50.11").unwrap();
    assert!(other.is_bare());
    assert!(!other.connected);
}

#[tokio::test]
async fn handshake_fails_when_not_admitted() {
    let transport = MockTransport::default();
    transport.push_json(&bootstrap(), &group_status(&[("192.168.10.50", 60157)]));
    transport.push_json(&bootstrap(), &admission(&[("192.168.10.50", 60157)]));
    let roster = SharedRoster::new(Roster::new(me()));

    let mut handshake = Handshake::new(&transport, &roster, bootstrap());
    let result = handshake.run().await;

    assert!(matches!(
        result,
        Err(HandshakeError::AdmissionRejected { ref ip, .. }) if ip == "127.0.0.1"
    ));
    assert_eq!(handshake.state(), HandshakeState::Failed);
    let roster = roster.snapshot();
    assert!(!roster.is_joined());
    assert!(!roster.is_member("127.0.0.1"));
}

#[tokio::test]
async fn handshake_fails_on_unreachable_bootstrap() {
    let transport = MockTransport::default();
    let roster = SharedRoster::new(Roster::new(me()));

    let mut handshake = Handshake::new(&transport, &roster, bootstrap());
    let result = handshake.run().await;

    match result {
        Err(HandshakeError::StatusQuery(e)) => assert!(e.is_unreachable()),
        other => panic!("Expected StatusQuery error, got {other:?}"),
    }
    assert_eq!(handshake.state(), HandshakeState::Failed);
    assert_eq!(transport.sent().len(), 1);
    assert!(roster.snapshot().is_empty());
}

#[tokio::test]
async fn handshake_fails_when_admission_times_out() {
    let transport = MockTransport::default();
    transport.push_json(&bootstrap(), &group_status(&[("192.168.10.50", 60157)]));
    transport.push_reply(&bootstrap(), Reply::TimedOut);
    let roster = SharedRoster::new(Roster::new(me()));

    let result = Handshake::new(&transport, &roster, bootstrap()).run().await;

    match result {
        Err(HandshakeError::Admission(e)) => assert!(!e.is_unreachable()),
        other => panic!("Expected Admission error, got {other:?}"),
    }
}

#[tokio::test]
async fn handshake_treats_malformed_status_as_no_data() {
    let transport = MockTransport::default();
    transport.push_reply(&bootstrap(), Reply::Body(b"<html>".to_vec()));
    transport.push_json(
        &bootstrap(),
        &admission(&[("192.168.10.50", 60157), ("127.0.0.1", 60000)]),
    );
    let roster = SharedRoster::new(Roster::new(me()));

    let result = Handshake::new(&transport, &roster, bootstrap()).run().await;

    assert_eq!(result.unwrap(), Joined::Admitted);
    assert_eq!(transport.sent().len(), 2);
    assert_eq!(roster.snapshot().name(), "LCC Primary");
}

fn heartbeat(transport: &Arc<MockTransport>, roster: &SharedRoster) -> Arc<Heartbeat<MockTransport>> {
    Arc::new(Heartbeat::new(
        Arc::clone(transport),
        roster.clone(),
        Duration::from_millis(1000),
        false,
    ))
}

#[tokio::test]
async fn heartbeat_reply_updates_member() {
    let peer = Peer::new("10.0.0.5", 60157);
    let transport = Arc::new(MockTransport::default());
    transport.push_reply(
        &peer,
        Reply::Body(
            br#"{"group_definition":{"secret":"","name":"G","members":[{"ip":"10.0.0.5","port":60157}]},"member_name":"x","status":{"ip":"10.0.0.5","port":60157,"name":"x","connected":false}}"#
                .to_vec(),
        ),
    );
    let mut roster = Roster::standalone(me(), "Stage");
    roster.insert_bare("10.0.0.5", 60157);
    let roster = SharedRoster::new(roster);

    let outcomes = heartbeat(&transport, &roster).tick().await;

    assert_eq!(outcomes, vec![(peer.clone(), ProbeOutcome::Alive)]);
    assert_eq!(
        transport.sent(),
        vec![(peer, Request::Heartbeat { port: 60000 })]
    );
    let roster = roster.snapshot();
    let member = roster.member("10.0.0.5").unwrap();
    assert_eq!(member.name.as_deref(), Some("x"));
    assert!(member.connected);
    assert_eq!(roster.name(), "G");
}

#[tokio::test]
async fn refused_heartbeat_only_disconnects_that_member() {
    let refusing = Peer::new("10.0.0.5", 60157);
    let slow = Peer::new("10.0.0.6", 60157);
    let transport = Arc::new(MockTransport::default());
    transport.push_reply(&refusing, Reply::Refused);
    transport.push_reply(&slow, Reply::TimedOut);

    let mut roster = Roster::standalone(me(), "Stage");
    for ip in ["10.0.0.5", "10.0.0.6"] {
        roster.upsert(Member {
            connected: true,
            ..Member::full(ip, 60157, "stage", details())
        });
    }
    let roster = SharedRoster::new(roster);
    let before = roster.snapshot();

    let mut outcomes = heartbeat(&transport, &roster).tick().await;
    outcomes.sort_by(|a, b| a.0.host.cmp(&b.0.host));

    assert_eq!(
        outcomes,
        vec![
            (refusing, ProbeOutcome::Refused),
            (slow, ProbeOutcome::Failed)
        ]
    );
    let after = roster.snapshot();
    assert!(!after.member("10.0.0.5").unwrap().connected);
    assert_eq!(after.member("10.0.0.6"), before.member("10.0.0.6"));
    assert_eq!(after.member("127.0.0.1"), before.member("127.0.0.1"));
    assert_eq!(after.len(), before.len());
}

#[tokio::test]
async fn malformed_heartbeat_reply_keeps_liveness() {
    let peer = Peer::new("10.0.0.5", 60157);
    let transport = Arc::new(MockTransport::default());
    transport.push_reply(&peer, Reply::Body(b"not json".to_vec()));
    let mut roster = Roster::standalone(me(), "Stage");
    roster.insert_bare("10.0.0.5", 60157);
    let roster = SharedRoster::new(roster);

    let outcomes = heartbeat(&transport, &roster).tick().await;

    assert_eq!(outcomes, vec![(peer, ProbeOutcome::Malformed)]);
    assert!(!roster.lock().member("10.0.0.5").unwrap().connected);
}

#[tokio::test]
async fn heartbeat_never_probes_self() {
    let transport = Arc::new(MockTransport::default());
    let roster = SharedRoster::new(Roster::standalone(me(), "Stage"));

    let outcomes = heartbeat(&transport, &roster).tick().await;

    assert!(outcomes.is_empty());
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn heartbeat_learns_new_members_without_probing_them() {
    let peer = Peer::new("10.0.0.5", 60157);
    let transport = Arc::new(MockTransport::default());
    transport.push_json(&peer, &group_status(&[("10.0.0.5", 60157), ("10.0.0.9", 52273)]));
    let mut roster = Roster::standalone(me(), "Stage");
    roster.insert_bare("10.0.0.5", 60157);
    let roster = SharedRoster::new(roster);

    heartbeat(&transport, &roster).tick().await;

    let roster = roster.snapshot();
    let learned = roster.member("10.0.0.9").unwrap();
    assert!(learned.is_bare());
    assert!(!learned.connected);
    assert!(roster.member("10.0.0.5").unwrap().connected);
    assert_eq!(transport.sent().len(), 1);
}

#[tokio::test]
async fn ticks_overlap_slow_probes() {
    let peer = Peer::new("10.0.0.5", 60157);
    let transport = Arc::new(MockTransport::default());
    let body = serde_json::to_vec(&group_status(&[("10.0.0.5", 60157)])).unwrap();
    for _ in 0..100 {
        transport.push_reply(&peer, Reply::Slow(Duration::from_secs(1), body.clone()));
    }
    let mut roster = Roster::standalone(me(), "Stage");
    roster.insert_bare("10.0.0.5", 60157);
    let roster = SharedRoster::new(roster);
    let heartbeat = Arc::new(Heartbeat::new(
        Arc::clone(&transport),
        roster.clone(),
        Duration::from_millis(40),
        false,
    ));

    let running = tokio::spawn(heartbeat.run());
    tokio::time::sleep(Duration::from_millis(300)).await;

    // Later ticks went out while the first probe was still waiting for its reply
    let sent = transport.sent();
    assert!(sent.len() >= 3, "only {} heartbeats sent", sent.len());
    assert!(sent
        .iter()
        .all(|(to, request)| to == &peer && *request == Request::Heartbeat { port: 60000 }));
    assert!(!roster.lock().member("10.0.0.5").unwrap().connected);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(roster.lock().member("10.0.0.5").unwrap().connected);
    running.abort();
}

fn config(me: Member, bootstrap: Option<Peer>) -> Config {
    Config {
        me,
        bootstrap,
        heartbeat_interval: Duration::from_secs(60),
        request_timeout: Duration::from_secs(2),
        log_heartbeats: false,
        group_name: "Stage".into(),
    }
}

#[test]
fn node_roster_depends_on_bootstrap() {
    let standalone = Node::with_transport(config(me(), None), MockTransport::default());
    assert!(standalone.roster().lock().is_joined());
    assert_eq!(standalone.roster().lock().name(), "Stage");

    let joining = Node::with_transport(config(me(), Some(bootstrap())), MockTransport::default());
    assert!(joining.roster().lock().is_empty());
    assert!(!joining.roster().lock().is_joined());
}

#[tokio::test]
async fn node_start_fails_without_group() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let node = Node::with_transport(config(me(), Some(bootstrap())), MockTransport::default());

    let result = node.start(listener).await;

    assert!(matches!(
        result,
        Err(crate::NodeError::Handshake(HandshakeError::StatusQuery(_)))
    ));
}

#[tokio::test]
async fn node_stops_when_heartbeat_engine_dies() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut config = config(me(), None);
    // Only reachable by skipping config validation, the ticker panics on it
    config.heartbeat_interval = Duration::ZERO;
    let node = Node::with_transport(config, MockTransport::default());

    let result = node.start(listener).await;

    assert!(matches!(result, Err(crate::NodeError::Task(e)) if e.is_panic()));
}

/// Starts a standalone node on an ephemeral loopback port
async fn spawn_standalone() -> (Peer, SharedRoster) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let node = Node::new(config(
        Member::full("127.0.0.1", port, "stage", details()),
        None,
    ))
    .unwrap();
    let roster = node.roster().clone();
    tokio::spawn(node.start(listener));
    (Peer::new("127.0.0.1", port), roster)
}

#[tokio::test]
async fn join_and_heartbeat_over_http() {
    let (stage, stage_roster) = spawn_standalone().await;
    let transport = Arc::new(HttpTransport::new(Duration::from_secs(2)).unwrap());
    let booth = SharedRoster::new(Roster::new(Member::full(
        "10.9.8.7",
        60157,
        "booth",
        details(),
    )));

    let joined = Handshake::new(transport.as_ref(), &booth, stage.clone())
        .run()
        .await
        .unwrap();
    assert_eq!(joined, Joined::Admitted);
    assert!(stage_roster.lock().member("10.9.8.7").unwrap().is_bare());
    assert_eq!(booth.lock().name(), "Stage");

    let heartbeat = Arc::new(Heartbeat::new(
        transport,
        booth.clone(),
        Duration::from_secs(60),
        false,
    ));
    let outcomes = heartbeat.tick().await;

    assert_eq!(outcomes, vec![(stage, ProbeOutcome::Alive)]);
    let booth = booth.snapshot();
    let stage_member = booth.member("127.0.0.1").unwrap();
    assert!(stage_member.connected);
    assert_eq!(stage_member.name.as_deref(), Some("stage"));
    assert_eq!(stage_member.details, Some(details()));
}

#[tokio::test]
async fn unknown_operations_succeed_with_empty_body() {
    let (stage, _) = spawn_standalone().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{stage}/group/remove_member"))
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response.headers()[reqwest::header::CONTENT_TYPE],
        "application/json"
    );
    assert!(response.bytes().await.unwrap().is_empty());

    let response = client
        .post(format!("http://{stage}/group/add_member"))
        .body("garbage")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert!(response.bytes().await.unwrap().is_empty());
}

#[tokio::test]
async fn closed_port_is_unreachable() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let transport = HttpTransport::new(Duration::from_secs(2)).unwrap();

    let error = transport
        .send(&Peer::new("127.0.0.1", port), &Request::Status)
        .await
        .unwrap_err();

    assert!(error.is_unreachable());
}
