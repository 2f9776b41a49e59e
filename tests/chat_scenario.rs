//! End-to-end sessions against a server on ephemeral loopback ports

use std::time::Duration;

use relaychat::protocol::SERVER_ORIGIN;
use relaychat::{
    ChatClient, ChatClientConfig, ChatServer, ClientEvent, Command, Endpoint, Frame, Message,
    ServerConfig,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(200);

type Events = UnboundedReceiver<ClientEvent>;

async fn start_server() -> ChatServer {
    let server = ChatServer::bind(ServerConfig::loopback()).await.unwrap();
    server.start_tcp().unwrap();
    server.start_udp();
    server
}

async fn connect(server: &ChatServer, name: &str) -> (ChatClient, Events) {
    let config = ChatClientConfig::new(
        server.local_tcp_address().socket_addr(),
        server.local_udp_address().socket_addr(),
    );
    ChatClient::connect(config, name).await.unwrap()
}

/// Connect, join, and wait until the server has registered the name
async fn joined(server: &ChatServer, name: &str) -> (ChatClient, Events) {
    let (client, events) = connect(server, name).await;
    client.join().await.unwrap();
    wait_for(server, name, false).await;
    (client, events)
}

/// Additionally open the UDP channel and wait for the binding
async fn joined_with_udp(server: &ChatServer, name: &str) -> (ChatClient, Events) {
    let (client, events) = joined(server, name).await;
    client.open_udp().await.unwrap();
    wait_for(server, name, true).await;
    (client, events)
}

async fn wait_for(server: &ChatServer, name: &str, with_udp: bool) {
    timeout(WAIT, async {
        loop {
            if let Ok(user) = server.users().find(name).await {
                if !with_udp || user.udp().is_some() {
                    return;
                }
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{} never registered", name));
}

async fn wait_gone(server: &ChatServer, name: &str) {
    timeout(WAIT, async {
        while server.users().find(name).await.is_ok() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{} never removed", name));
}

async fn next_message(events: &mut Events) -> Message {
    match timeout(WAIT, events.recv()).await {
        Ok(Some(ClientEvent::Message(message))) => message,
        other => panic!("expected a message, got {:?}", other),
    }
}

async fn next_frame(events: &mut Events) -> Frame {
    match timeout(WAIT, events.recv()).await {
        Ok(Some(ClientEvent::Frame(frame))) => frame,
        other => panic!("expected a frame, got {:?}", other),
    }
}

async fn assert_quiet(events: &mut Events) {
    if let Ok(event) = timeout(QUIET, events.recv()).await {
        panic!("expected nothing, got {:?}", event);
    }
}

/// `ls` round trip; also proves every earlier request on this session was handled
async fn list(client: &ChatClient, events: &mut Events) -> Vec<String> {
    client.send(Command::Ls, "").await.unwrap();
    let reply = next_message(events).await;
    assert_eq!(reply.origin, SERVER_ORIGIN);
    assert_eq!(reply.kind, "ls");

    let mut names: Vec<String> = reply.text.split_whitespace().map(String::from).collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_alice_and_bob_scenario() {
    let server = start_server().await;
    let (alice, mut alice_events) = joined(&server, "alice").await;
    let (bob, mut bob_events) = joined(&server, "bob").await;

    alice.send(Command::Pm, "hello").await.unwrap();
    assert_eq!(
        next_message(&mut bob_events).await,
        Message::new("alice", "pm", "hello")
    );
    assert_quiet(&mut alice_events).await;

    bob.send(Command::Dm, "alice:hi").await.unwrap();
    assert_eq!(
        next_message(&mut alice_events).await,
        Message::new("bob", "dm", "alice:hi")
    );
    assert_quiet(&mut bob_events).await;
}

#[tokio::test]
async fn test_pm_reaches_every_other_user_once() {
    let server = start_server().await;
    let (_alice, mut alice_events) = joined(&server, "alice").await;
    let (_bob, mut bob_events) = joined(&server, "bob").await;
    let (carol, mut carol_events) = joined(&server, "carol").await;

    carol.send(Command::Pm, "meeting at 10:30, room 4").await.unwrap();

    let expected = Message::new("carol", "pm", "meeting at 10:30, room 4");
    assert_eq!(next_message(&mut alice_events).await, expected);
    assert_eq!(next_message(&mut bob_events).await, expected);
    assert_quiet(&mut alice_events).await;
    assert_quiet(&mut bob_events).await;
    assert_quiet(&mut carol_events).await;
}

#[tokio::test]
async fn test_pm_from_unregistered_origin_is_rejected() {
    let server = start_server().await;
    let (_alice, mut alice_events) = joined(&server, "alice").await;
    let (dave, mut dave_events) = connect(&server, "dave").await;

    dave.send(Command::Pm, "anyone?").await.unwrap();
    assert_eq!(list(&dave, &mut dave_events).await, vec!["alice"]);
    assert_quiet(&mut alice_events).await;

    // The session stayed open and can still join
    dave.join().await.unwrap();
    wait_for(&server, "dave", false).await;
}

#[tokio::test]
async fn test_dm_unknown_target_keeps_session() {
    let server = start_server().await;
    let (alice, mut alice_events) = joined(&server, "alice").await;

    alice.send(Command::Dm, "nobody:are you there").await.unwrap();
    alice.send(Command::Dm, "no colon at all").await.unwrap();
    assert_eq!(list(&alice, &mut alice_events).await, vec!["alice"]);
    assert!(alice.is_connected());
}

#[tokio::test]
async fn test_ls_lists_registered_names() {
    let server = start_server().await;
    let (alice, mut alice_events) = joined(&server, "alice").await;
    let (_bob, mut bob_events) = joined(&server, "bob").await;

    assert_eq!(list(&alice, &mut alice_events).await, vec!["alice", "bob"]);
    assert_quiet(&mut bob_events).await;
}

#[tokio::test]
async fn test_duplicate_and_invalid_names() {
    let server = start_server().await;
    let (_first, _first_events) = joined(&server, "alice").await;
    let (second, mut second_events) = connect(&server, "alice").await;
    let (bad, mut bad_events) = connect(&server, "bad:name").await;

    second.join().await.unwrap();
    bad.join().await.unwrap();

    assert_eq!(list(&second, &mut second_events).await, vec!["alice"]);
    assert_eq!(list(&bad, &mut bad_events).await, vec!["alice"]);
    assert_eq!(server.users().len().await, 1);
}

#[tokio::test]
async fn test_quit_removes_user_and_udp_channel() {
    let server = start_server().await;
    let (alice, _alice_events) = joined_with_udp(&server, "alice").await;
    let (bob, mut bob_events) = joined(&server, "bob").await;
    assert_eq!(server.multiplexer().route_count(), 1);

    alice.shutdown().await;
    wait_gone(&server, "alice").await;

    timeout(WAIT, async {
        while server.multiplexer().route_count() != 0 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("udp route never detached");
    assert_eq!(list(&bob, &mut bob_events).await, vec!["bob"]);
}

#[tokio::test]
async fn test_disconnect_removes_user() {
    let server = start_server().await;
    let (bob, _bob_events) = joined(&server, "bob").await;
    let (carol, mut carol_events) = joined(&server, "carol").await;
    let (alice, _alice_events) = joined(&server, "alice").await;

    // No quit: the session ends on a transport failure
    drop(bob);
    wait_gone(&server, "bob").await;

    alice.send(Command::Pm, "still here").await.unwrap();
    assert_eq!(
        next_message(&mut carol_events).await,
        Message::new("alice", "pm", "still here")
    );
    assert_eq!(list(&carol, &mut carol_events).await, vec!["alice", "carol"]);
}

#[tokio::test]
async fn test_udp_relay_skips_sender() {
    let server = start_server().await;
    let (alice, mut alice_events) = joined_with_udp(&server, "alice").await;
    let (_bob, mut bob_events) = joined_with_udp(&server, "bob").await;
    let (_carol, mut carol_events) = joined_with_udp(&server, "carol").await;

    let payload: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
    alice.send_frame(payload.clone()).await.unwrap();

    assert_eq!(&next_frame(&mut bob_events).await.bytes[..], &payload[..]);
    assert_eq!(&next_frame(&mut carol_events).await.bytes[..], &payload[..]);
    assert_quiet(&mut alice_events).await;
}

#[tokio::test]
async fn test_udp_from_unbound_peer_is_dropped() {
    let server = start_server().await;
    let (_alice, mut alice_events) = joined_with_udp(&server, "alice").await;
    let (bob, _bob_events) = joined(&server, "bob").await;

    // bob never announced a UDP port
    bob.send_frame(vec![1u8, 2, 3]).await.unwrap();
    assert_quiet(&mut alice_events).await;
}

#[tokio::test]
async fn test_second_plus_udp_is_rejected_while_live() {
    let server = start_server().await;
    let (alice, mut alice_events) = joined_with_udp(&server, "alice").await;

    alice.open_udp().await.unwrap();
    list(&alice, &mut alice_events).await;
    assert_eq!(server.multiplexer().route_count(), 1);
}

#[tokio::test]
async fn test_plus_udp_with_another_users_port_keeps_their_channel() {
    let server = start_server().await;
    let (alice, _alice_events) = joined_with_udp(&server, "alice").await;
    let (_carol, mut carol_events) = joined_with_udp(&server, "carol").await;
    let (bob, mut bob_events) = joined(&server, "bob").await;

    let port = alice.local_udp_address().unwrap().port;
    bob.send(Command::PlusUdp, &port.to_string()).await.unwrap();
    list(&bob, &mut bob_events).await;

    assert!(server.users().find("bob").await.unwrap().udp().is_none());
    assert_eq!(server.multiplexer().route_count(), 2);

    alice.send_frame(vec![9u8, 8, 7]).await.unwrap();
    assert_eq!(&next_frame(&mut carol_events).await.bytes[..], &[9u8, 8, 7]);
}

#[tokio::test]
async fn test_concurrent_plus_udp_binds_once() {
    let server = start_server().await;
    let (alice, mut alice_events) = joined(&server, "alice").await;
    // Second session speaking for alice without joining
    let (shadow, mut shadow_events) = connect(&server, "alice").await;

    let (first, second) = tokio::join!(alice.open_udp(), shadow.open_udp());
    first.unwrap();
    second.unwrap();

    // An ls reply means the +udp before it was handled
    list(&alice, &mut alice_events).await;
    list(&shadow, &mut shadow_events).await;

    let user = server.users().find("alice").await.unwrap();
    let bound = user.udp().expect("one binding is live");
    let candidates = [
        alice.local_udp_address().unwrap(),
        shadow.local_udp_address().unwrap(),
    ];
    assert!(candidates.contains(&bound.remote_address()));

    timeout(WAIT, async {
        while server.multiplexer().route_count() != 1 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("losing attachment never detached");
}

#[tokio::test]
async fn test_server_quit_closes_sessions() {
    let server = start_server().await;
    let (alice, mut alice_events) = joined(&server, "alice").await;

    server.quit().await;
    assert!(server.users().is_empty().await);
    match timeout(WAIT, alice_events.recv()).await {
        Ok(Some(ClientEvent::Closed(_))) | Ok(None) => {}
        other => panic!("expected close, got {:?}", other),
    }
    assert!(!alice.is_connected());
}
