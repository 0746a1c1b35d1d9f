//! Room registry — group-keyed broadcast routing for live connections.
//!
//! DESIGN
//! ======
//! A room is an ephemeral mapping of connection id → outgoing channel,
//! keyed by group id. Registration happens only after the websocket layer
//! has verified group membership; deregistration runs on leave and on
//! disconnect, and the last member's exit evicts the room so the registry
//! never grows unbounded. Broadcasts are best-effort `try_send` with no
//! acknowledgment — a member whose channel is full or gone simply misses
//! the event and resyncs through the read APIs.

use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::event::Event;
use crate::state::{AppState, RoomMember, RoomState};

/// Register a connection in a group room.
pub async fn register(state: &AppState, group_id: Uuid, conn_id: Uuid, user_id: Uuid, tx: mpsc::Sender<Event>) {
    let mut rooms = state.rooms.write().await;
    let room = rooms.entry(group_id).or_insert_with(RoomState::new);
    room.members.insert(conn_id, RoomMember { user_id, tx });
    info!(%group_id, %conn_id, members = room.members.len(), "connection joined room");
}

/// Remove a connection from a group room, evicting the room when empty.
pub async fn deregister(state: &AppState, group_id: Uuid, conn_id: Uuid) {
    let mut rooms = state.rooms.write().await;
    let Some(room) = rooms.get_mut(&group_id) else {
        return;
    };
    room.members.remove(&conn_id);
    info!(%group_id, %conn_id, remaining = room.members.len(), "connection left room");

    if room.members.is_empty() {
        rooms.remove(&group_id);
        info!(%group_id, "evicted empty room");
    }
}

/// Broadcast an event to every connection in a room, optionally excluding
/// one (the originator).
pub async fn broadcast(state: &AppState, group_id: Uuid, event: &Event, exclude: Option<Uuid>) {
    let rooms = state.rooms.read().await;
    let Some(room) = rooms.get(&group_id) else {
        return;
    };

    for (conn_id, member) in &room.members {
        if exclude == Some(*conn_id) {
            continue;
        }
        // Best-effort: if a member's channel is full, skip it.
        let _ = member.tx.try_send(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event;
    use crate::state::test_helpers;
    use tokio::time::{Duration, timeout};

    async fn recv_event(rx: &mut mpsc::Receiver<Event>) -> Event {
        timeout(Duration::from_millis(200), rx.recv())
            .await
            .expect("broadcast receive timed out")
            .expect("broadcast channel closed unexpectedly")
    }

    #[tokio::test]
    async fn broadcast_reaches_all_members() {
        let state = test_helpers::test_app_state();
        let group_id = test_helpers::seed_room(&state).await;

        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        register(&state, group_id, Uuid::new_v4(), Uuid::new_v4(), tx_a).await;
        register(&state, group_id, Uuid::new_v4(), Uuid::new_v4(), tx_b).await;

        let event = Event::notify(event::SESSION_STARTED).with_data("groupId", group_id.to_string());
        broadcast(&state, group_id, &event, None).await;

        assert_eq!(recv_event(&mut rx_a).await.event, event::SESSION_STARTED);
        assert_eq!(recv_event(&mut rx_b).await.event, event::SESSION_STARTED);
    }

    #[tokio::test]
    async fn broadcast_excludes_sender() {
        let state = test_helpers::test_app_state();
        let group_id = test_helpers::seed_room(&state).await;

        let sender_conn = Uuid::new_v4();
        let (tx_sender, mut rx_sender) = mpsc::channel(8);
        let (tx_peer, mut rx_peer) = mpsc::channel(8);
        register(&state, group_id, sender_conn, Uuid::new_v4(), tx_sender).await;
        register(&state, group_id, Uuid::new_v4(), Uuid::new_v4(), tx_peer).await;

        let event = Event::notify(event::MOVIE_VOTED).with_data("movieId", "603");
        broadcast(&state, group_id, &event, Some(sender_conn)).await;

        assert_eq!(recv_event(&mut rx_peer).await.event, event::MOVIE_VOTED);
        assert!(
            timeout(Duration::from_millis(80), rx_sender.recv()).await.is_err(),
            "sender should not receive its own broadcast"
        );
    }

    #[tokio::test]
    async fn broadcast_does_not_cross_rooms() {
        let state = test_helpers::test_app_state();
        let room_a = test_helpers::seed_room(&state).await;
        let room_b = test_helpers::seed_room(&state).await;

        let (tx_b, mut rx_b) = mpsc::channel(8);
        register(&state, room_b, Uuid::new_v4(), Uuid::new_v4(), tx_b).await;

        broadcast(&state, room_a, &Event::notify(event::USER_JOINED), None).await;

        assert!(
            timeout(Duration::from_millis(80), rx_b.recv()).await.is_err(),
            "events must stay within their room"
        );
    }

    #[tokio::test]
    async fn last_member_exit_evicts_room() {
        let state = test_helpers::test_app_state();
        let group_id = Uuid::new_v4();

        let conn_a = Uuid::new_v4();
        let conn_b = Uuid::new_v4();
        let (tx_a, _rx_a) = mpsc::channel(8);
        let (tx_b, _rx_b) = mpsc::channel(8);
        register(&state, group_id, conn_a, Uuid::new_v4(), tx_a).await;
        register(&state, group_id, conn_b, Uuid::new_v4(), tx_b).await;

        deregister(&state, group_id, conn_a).await;
        {
            let rooms = state.rooms.read().await;
            assert!(rooms.contains_key(&group_id));
        }

        deregister(&state, group_id, conn_b).await;
        let rooms = state.rooms.read().await;
        assert!(!rooms.contains_key(&group_id));
    }

    #[tokio::test]
    async fn deregister_unknown_room_is_noop() {
        let state = test_helpers::test_app_state();
        deregister(&state, Uuid::new_v4(), Uuid::new_v4()).await;
        let rooms = state.rooms.read().await;
        assert!(rooms.is_empty());
    }

    #[tokio::test]
    async fn full_channel_is_skipped_not_fatal() {
        let state = test_helpers::test_app_state();
        let group_id = test_helpers::seed_room(&state).await;

        let (tx_full, _rx_full) = mpsc::channel(1);
        let (tx_ok, mut rx_ok) = mpsc::channel(8);
        // Fill the first member's channel so try_send fails for it.
        tx_full.try_send(Event::new("filler")).unwrap();
        register(&state, group_id, Uuid::new_v4(), Uuid::new_v4(), tx_full).await;
        register(&state, group_id, Uuid::new_v4(), Uuid::new_v4(), tx_ok).await;

        broadcast(&state, group_id, &Event::notify(event::USER_LEFT), None).await;
        assert_eq!(recv_event(&mut rx_ok).await.event, event::USER_LEFT);
    }
}
