//! Concurrency tests for lounge.
//!
//! These tests verify that room creation, membership moves and broadcasts
//! stay consistent when many sessions act at once.

mod common;

use std::sync::Arc;

use lounge::chat::{swap_membership, RoomRegistry};
use lounge::peer::{Outbound, Outbox, Response};
use lounge::{ClientEvent, Event, SessionId};

use common::{wait_for, with_timeout, TestServer};

/// Setup a registry with the usual defaults.
fn setup_registry() -> Arc<RoomRegistry> {
    Arc::new(RoomRegistry::new("Lobby", 10))
}

/// Test concurrent creation of the same room.
///
/// Every caller must get the very same room instance.
#[tokio::test]
async fn test_concurrent_prepare_room() {
    let registry = setup_registry();

    const NUM_TASKS: usize = 32;

    let mut handles = Vec::new();
    for _ in 0..NUM_TASKS {
        let registry = Arc::clone(&registry);
        handles.push(tokio::spawn(async move {
            registry.prepare_room("Tech").await
        }));
    }

    let mut rooms = Vec::new();
    for handle in handles {
        rooms.push(handle.await.unwrap());
    }

    assert!(rooms.iter().all(|room| Arc::ptr_eq(room, &rooms[0])));
    assert_eq!(registry.room_count().await, 1);
}

/// Test interleaved room changes between two rooms.
///
/// Sessions hop back and forth concurrently; at any end state each session
/// must be a member of exactly one room.
#[tokio::test]
async fn test_concurrent_swaps_keep_single_membership() {
    let registry = setup_registry();
    let lobby = registry.prepare_room("").await;
    let tech = registry.prepare_room("Tech").await;

    const NUM_SESSIONS: usize = 16;
    const NUM_HOPS: usize = 25;

    let mut sessions = Vec::new();
    let mut receivers = Vec::new();
    for _ in 0..NUM_SESSIONS {
        let (outbox, rx) = Outbox::channel(4);
        let id = SessionId::new();
        lobby.join(id, outbox.clone()).await;
        sessions.push((id, outbox));
        receivers.push(rx);
    }

    let mut handles = Vec::new();
    for (i, (id, outbox)) in sessions.iter().cloned().enumerate() {
        let lobby = Arc::clone(&lobby);
        let tech = Arc::clone(&tech);
        handles.push(tokio::spawn(async move {
            // Odd sessions make one extra hop and finish in the other room.
            let hops = NUM_HOPS + i % 2;
            for hop in 0..hops {
                let (from, to) = if hop % 2 == 0 {
                    (&lobby, &tech)
                } else {
                    (&tech, &lobby)
                };
                swap_membership(from, to, id, outbox.clone()).await;
                tokio::task::yield_now().await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    for (i, (id, _)) in sessions.iter().enumerate() {
        let in_lobby = lobby.is_member(*id).await;
        let in_tech = tech.is_member(*id).await;
        assert!(in_lobby ^ in_tech, "session {i} must be in exactly one room");
        // NUM_HOPS is odd, so even sessions end in Tech.
        assert_eq!(in_tech, i % 2 == 0, "session {i} ended in the wrong room");
    }
    assert_eq!(
        lobby.occupancy().await + tech.occupancy().await,
        NUM_SESSIONS
    );
}

/// Test that concurrent posters never reorder a member's notifications
/// relative to the room history.
#[tokio::test]
async fn test_concurrent_posts_preserve_history_order() {
    let registry = setup_registry();
    let room = registry.prepare_room("").await;

    let (listener_outbox, mut listener_rx) = Outbox::channel(1024);
    let listener = SessionId::new();
    room.join(listener, listener_outbox).await;

    const NUM_POSTERS: usize = 8;
    const NUM_MESSAGES: usize = 20;

    let mut handles = Vec::new();
    for p in 0..NUM_POSTERS {
        let room = Arc::clone(&room);
        handles.push(tokio::spawn(async move {
            let sender = SessionId::new();
            for m in 0..NUM_MESSAGES {
                room.post_and_broadcast(sender, &format!("poster{p}"), format!("{p}:{m}"))
                    .await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let mut received = Vec::new();
    while let Ok(Outbound { body, .. }) = listener_rx.try_recv() {
        if let Response::Event(Event::RoomMsgs { log }) = body {
            received.extend(log.msgs.into_iter().map(|m| m.content));
        }
    }
    assert_eq!(received.len(), NUM_POSTERS * NUM_MESSAGES);

    // The tail of the received stream is exactly the retained history.
    let history: Vec<_> = room
        .recent_log()
        .await
        .msgs
        .iter()
        .map(|m| m.content.clone())
        .collect();
    assert_eq!(history.len(), 10);
    assert_eq!(&received[received.len() - history.len()..], &history[..]);

    // Each poster's own messages arrive in the order they were sent.
    for p in 0..NUM_POSTERS {
        let prefix = format!("{p}:");
        let own: Vec<_> = received.iter().filter(|c| c.starts_with(&prefix)).collect();
        let expected: Vec<_> = (0..NUM_MESSAGES).map(|m| format!("{p}:{m}")).collect();
        assert_eq!(own, expected.iter().collect::<Vec<_>>());
    }
}

/// Test many clients chatting at once over real connections.
#[tokio::test]
async fn test_concurrent_clients_chatting() {
    let server = TestServer::new().await;

    const NUM_CLIENTS: usize = 6;

    let mut clients = Vec::new();
    for i in 0..NUM_CLIENTS {
        let mut client = server.connect(&format!("client{i}")).await;
        client.set_nick(&format!("user{i}")).await.unwrap();
        clients.push(client);
    }

    let mut handles = Vec::new();
    for mut client in clients {
        handles.push(tokio::spawn(async move {
            client.say(&format!("hello from {}", client.nick())).await.unwrap();

            // Own confirmation once, every other chatter's message once.
            let mut said = false;
            let mut seen = 0;
            while !said || seen < NUM_CLIENTS - 1 {
                match wait_for(&mut client, |e| {
                    matches!(
                        e,
                        ClientEvent::Said { .. } | ClientEvent::Server(Event::RoomMsgs { .. })
                    )
                })
                .await
                {
                    ClientEvent::Said { .. } => {
                        assert!(!said);
                        said = true;
                    }
                    ClientEvent::Server(Event::RoomMsgs { log }) => {
                        assert_ne!(log.msgs[0].from, client.nick());
                        seen += 1;
                    }
                    _ => unreachable!(),
                }
            }
            client
        }));
    }

    for handle in handles {
        let client = with_timeout(handle).await.unwrap();
        assert_eq!(client.unconfirmed().await, 0);
    }

    let lobby = server.service().registry.get_room("Lobby").await.unwrap();
    assert_eq!(lobby.occupancy().await, NUM_CLIENTS);
    assert_eq!(lobby.recent_log().await.msgs.len(), NUM_CLIENTS);
}

#[tokio::test]
async fn test_closed_member_is_pruned_on_broadcast() {
    let registry = setup_registry();
    let room = registry.prepare_room("").await;

    let (outbox, rx) = Outbox::channel(4);
    let gone = SessionId::new();
    room.join(gone, outbox).await;
    drop(rx);

    let report = room
        .broadcast(
            Event::Notice {
                text: "anyone?".to_string(),
            },
            None,
        )
        .await;

    assert_eq!(report.dropped, 1);
    assert!(!room.is_member(gone).await);
}
