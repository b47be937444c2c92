//! Chat room implementation for lounge.
//!
//! A room owns its member set and a bounded message history behind one
//! lock. Notifications are queued on each member's [`Outbox`] after that
//! lock is released; a second per-room lock keeps fan-outs in the order
//! their triggering events were recorded.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::history::MessageLog;
use super::message::{Message, RoomMsgs};
use crate::peer::{DeliveryError, Event, Outbound, Outbox, SessionId};

#[derive(Debug)]
struct RoomState {
    members: HashMap<SessionId, Outbox>,
    log: MessageLog,
}

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Members the event was queued for.
    pub delivered: usize,
    /// Members whose queue was full; they missed this event but stay.
    pub backlogged: usize,
    /// Members found disconnected and removed.
    pub dropped: usize,
}

/// A chat room.
#[derive(Debug)]
pub struct Room {
    id: String,
    state: Mutex<RoomState>,
    fanout: Mutex<()>,
}

impl Room {
    /// Create an empty room keeping `max_history` messages.
    pub fn new(id: impl Into<String>, max_history: usize) -> Self {
        let id = id.into();
        Self {
            state: Mutex::new(RoomState {
                members: HashMap::new(),
                log: MessageLog::new(id.clone(), max_history),
            }),
            fanout: Mutex::new(()),
            id,
        }
    }

    /// Get the room ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the number of members.
    pub async fn occupancy(&self) -> usize {
        self.state.lock().await.members.len()
    }

    /// Check if a session is in the room.
    pub async fn is_member(&self, session: SessionId) -> bool {
        self.state.lock().await.members.contains_key(&session)
    }

    /// Add a member.
    ///
    /// Returns true if the session was added, false if already present.
    pub async fn join(&self, session: SessionId, outbox: Outbox) -> bool {
        let mut state = self.state.lock().await;
        if state.members.contains_key(&session) {
            return false;
        }
        state.members.insert(session, outbox);
        true
    }

    /// Remove a member.
    ///
    /// Returns true if the session was removed, false if not in the room.
    pub async fn leave(&self, session: SessionId) -> bool {
        self.state.lock().await.members.remove(&session).is_some()
    }

    /// Append a message to the history without notifying anyone.
    #[cfg(test)]
    pub(crate) async fn post(&self, from: &str, content: impl Into<String>) -> Message {
        let msg = Message::new(from, content);
        self.state.lock().await.log.push(msg.clone());
        msg
    }

    /// Snapshot of the recent history.
    pub async fn recent_log(&self) -> Arc<RoomMsgs> {
        self.state.lock().await.log.recent()
    }

    /// Queue `event` for every member except `excluding`.
    pub async fn broadcast(&self, event: Event, excluding: Option<SessionId>) -> BroadcastReport {
        let state = self.state.lock().await;
        let targets = Self::snapshot(&state.members, excluding);
        let order = self.fanout.lock().await;
        drop(state);

        self.dispatch(order, targets, event).await
    }

    /// Append a message and fan it out to everyone but its sender.
    pub async fn post_and_broadcast(
        &self,
        sender: SessionId,
        from: &str,
        content: impl Into<String>,
    ) -> (Message, BroadcastReport) {
        let msg = Message::new(from, content);

        let mut state = self.state.lock().await;
        state.log.push(msg.clone());
        let targets = Self::snapshot(&state.members, Some(sender));
        let order = self.fanout.lock().await;
        drop(state);

        let event = Event::RoomMsgs {
            log: RoomMsgs::single(self.id.clone(), msg.clone()),
        };
        let report = self.dispatch(order, targets, event).await;
        (msg, report)
    }

    fn snapshot(
        members: &HashMap<SessionId, Outbox>,
        excluding: Option<SessionId>,
    ) -> Vec<(SessionId, Outbox)> {
        members
            .iter()
            .filter(|(id, _)| Some(**id) != excluding)
            .map(|(id, outbox)| (*id, outbox.clone()))
            .collect()
    }

    async fn dispatch(
        &self,
        order: tokio::sync::MutexGuard<'_, ()>,
        targets: Vec<(SessionId, Outbox)>,
        event: Event,
    ) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut gone = Vec::new();

        for (session, outbox) in targets {
            match outbox.push(Outbound::event(event.clone())) {
                Ok(()) => report.delivered += 1,
                Err(DeliveryError::Backlogged) => {
                    warn!(room = %self.id, %session, "Outbound queue full, notification dropped");
                    report.backlogged += 1;
                }
                Err(DeliveryError::Gone) => {
                    debug!(room = %self.id, %session, "Member gone during broadcast");
                    gone.push(session);
                }
            }
        }
        drop(order);

        if !gone.is_empty() {
            let mut state = self.state.lock().await;
            for session in gone {
                let still_dead = state
                    .members
                    .get(&session)
                    .is_some_and(|outbox| outbox.is_closed());
                if still_dead {
                    state.members.remove(&session);
                    report.dropped += 1;
                }
            }
        }

        report
    }
}

/// Move `session` from one room to another.
///
/// Both rooms are locked, in id order, for the whole move so the session is
/// never observed in zero or two rooms. Returns the occupancy of `to`.
pub async fn swap_membership(from: &Room, to: &Room, session: SessionId, outbox: Outbox) -> usize {
    if from.id == to.id {
        let mut state = to.state.lock().await;
        state.members.entry(session).or_insert(outbox);
        return state.members.len();
    }

    let (first, second) = if from.id < to.id {
        (from, to)
    } else {
        (to, from)
    };
    let mut first_state = first.state.lock().await;
    let mut second_state = second.state.lock().await;
    let (from_state, to_state) = if from.id < to.id {
        (&mut first_state, &mut second_state)
    } else {
        (&mut second_state, &mut first_state)
    };

    from_state.members.remove(&session);
    to_state.members.insert(session, outbox);
    to_state.members.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::{Outbound, Response};
    use tokio::sync::mpsc;

    fn member() -> (SessionId, Outbox, mpsc::Receiver<Outbound>) {
        let (outbox, rx) = Outbox::channel(16);
        (SessionId::new(), outbox, rx)
    }

    fn notice(text: &str) -> Event {
        Event::Notice {
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_room_new() {
        let room = Room::new("Lobby", 10);
        assert_eq!(room.id(), "Lobby");
        assert_eq!(room.occupancy().await, 0);
        assert!(room.recent_log().await.is_empty());
    }

    #[tokio::test]
    async fn test_room_join_and_leave() {
        let room = Room::new("Lobby", 10);
        let (id, outbox, _rx) = member();

        assert!(room.join(id, outbox.clone()).await);
        assert!(!room.join(id, outbox).await);
        assert_eq!(room.occupancy().await, 1);
        assert!(room.is_member(id).await);

        assert!(room.leave(id).await);
        assert!(!room.leave(id).await);
        assert!(!room.is_member(id).await);
    }

    #[tokio::test]
    async fn test_post_caps_history() {
        let room = Room::new("Lobby", 3);
        for i in 0..5 {
            room.post("Alice", format!("m{i}")).await;
        }

        let log = room.recent_log().await;
        let contents: Vec<_> = log.msgs.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_recent_log_cache_invalidated_by_post() {
        let room = Room::new("Lobby", 10);
        room.post("Alice", "one").await;

        let a = room.recent_log().await;
        let b = room.recent_log().await;
        assert!(Arc::ptr_eq(&a, &b));

        room.post("Bob", "two").await;
        let c = room.recent_log().await;
        assert_eq!(c.msgs.len(), 2);
        assert_eq!(c.msgs[1].from, "Bob");
    }

    #[tokio::test]
    async fn test_broadcast_excludes_sender() {
        let room = Room::new("Lobby", 10);
        let (alice, alice_box, mut alice_rx) = member();
        let (bob, bob_box, mut bob_rx) = member();
        room.join(alice, alice_box).await;
        room.join(bob, bob_box).await;

        let report = room.broadcast(notice("hello"), Some(alice)).await;
        assert_eq!(report.delivered, 1);

        let frame = bob_rx.try_recv().unwrap();
        assert_eq!(frame.body, Response::Event(notice("hello")));
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_drops_gone_member() {
        let room = Room::new("Lobby", 10);
        let (alice, alice_box, mut alice_rx) = member();
        let (bob, bob_box, bob_rx) = member();
        room.join(alice, alice_box).await;
        room.join(bob, bob_box).await;
        drop(bob_rx);

        let report = room.broadcast(notice("anyone?"), None).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.dropped, 1);
        assert!(!room.is_member(bob).await);
        assert!(room.is_member(alice).await);
        assert!(alice_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_broadcast_keeps_backlogged_member() {
        let room = Room::new("Lobby", 10);
        let (slow_box, mut slow_rx) = Outbox::channel(1);
        let slow = SessionId::new();
        room.join(slow, slow_box).await;

        assert_eq!(room.broadcast(notice("1"), None).await.delivered, 1);
        let report = room.broadcast(notice("2"), None).await;
        assert_eq!(report.backlogged, 1);
        assert!(room.is_member(slow).await);

        assert_eq!(slow_rx.try_recv().unwrap().body, Response::Event(notice("1")));
        assert!(slow_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_post_and_broadcast() {
        let room = Room::new("Lobby", 10);
        let (alice, alice_box, mut alice_rx) = member();
        let (bob, bob_box, mut bob_rx) = member();
        room.join(alice, alice_box).await;
        room.join(bob, bob_box).await;

        let (msg, report) = room.post_and_broadcast(alice, "Alice", "hi").await;
        assert_eq!(msg.content, "hi");
        assert_eq!(report.delivered, 1);

        match bob_rx.try_recv().unwrap().body {
            Response::Event(Event::RoomMsgs { log }) => {
                assert_eq!(log.room, "Lobby");
                assert_eq!(log.msgs, vec![msg]);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
        assert!(alice_rx.try_recv().is_err());
        assert_eq!(room.recent_log().await.msgs.len(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_preserves_order() {
        let room = Arc::new(Room::new("Lobby", 100));
        let (watcher_box, mut watcher_rx) = Outbox::channel(64);
        let watcher = SessionId::new();
        room.join(watcher, watcher_box).await;
        let sender = SessionId::new();

        for i in 0..50 {
            room.post_and_broadcast(sender, "Alice", i.to_string()).await;
        }

        let mut seen = Vec::new();
        while let Ok(frame) = watcher_rx.try_recv() {
            if let Response::Event(Event::RoomMsgs { log }) = frame.body {
                seen.push(log.msgs[0].content.clone());
            }
        }
        let history: Vec<_> = room
            .recent_log()
            .await
            .msgs
            .iter()
            .map(|m| m.content.clone())
            .collect();
        assert_eq!(seen.len(), 50);
        assert_eq!(seen, history);
    }

    #[tokio::test]
    async fn test_backlogged_member_sees_gap_but_stays() {
        let room = Room::new("Lobby", 100);
        let (slow_box, mut slow_rx) = Outbox::channel(2);
        let slow = SessionId::new();
        room.join(slow, slow_box).await;
        let sender = SessionId::new();

        let mut backlogged = 0;
        for i in 0..5 {
            let (_, report) = room.post_and_broadcast(sender, "Alice", i.to_string()).await;
            backlogged += report.backlogged;
        }
        assert_eq!(backlogged, 3);
        assert!(room.is_member(slow).await);
        assert_eq!(room.recent_log().await.msgs.len(), 5);

        let mut seen = Vec::new();
        while let Ok(frame) = slow_rx.try_recv() {
            if let Response::Event(Event::RoomMsgs { log }) = frame.body {
                seen.push(log.msgs[0].content.clone());
            }
        }
        assert_eq!(seen, vec!["0", "1"]);

        // Once drained, the member receives again.
        let (_, report) = room.post_and_broadcast(sender, "Alice", "5").await;
        assert_eq!(report.delivered, 1);
        match slow_rx.try_recv().unwrap().body {
            Response::Event(Event::RoomMsgs { log }) => assert_eq!(log.msgs[0].content, "5"),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_swap_membership() {
        let lobby = Room::new("Lobby", 10);
        let tech = Room::new("Tech", 10);
        let (id, outbox, _rx) = member();
        lobby.join(id, outbox.clone()).await;

        let occupancy = swap_membership(&lobby, &tech, id, outbox.clone()).await;
        assert_eq!(occupancy, 1);
        assert!(!lobby.is_member(id).await);
        assert!(tech.is_member(id).await);

        let occupancy = swap_membership(&tech, &lobby, id, outbox.clone()).await;
        assert_eq!(occupancy, 1);
        assert!(lobby.is_member(id).await);
        assert!(!tech.is_member(id).await);

        let occupancy = swap_membership(&lobby, &lobby, id, outbox).await;
        assert_eq!(occupancy, 1);
        assert!(lobby.is_member(id).await);
    }
}
