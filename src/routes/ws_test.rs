use super::*;
use crate::state::test_helpers;
use tokio::time::{Duration, timeout};

async fn dispatch(
    state: &AppState,
    current_group: &mut Option<Uuid>,
    conn_id: Uuid,
    user_id: Uuid,
    client_tx: &mpsc::Sender<Event>,
    text: &str,
) -> Vec<Event> {
    process_event(state, current_group, conn_id, user_id, client_tx, text).await
}

fn error_message(events: &[Event]) -> &str {
    assert_eq!(events.len(), 1, "expected exactly one reply event");
    assert_eq!(events[0].event, event::ERROR);
    events[0].str_field(event::EVENT_MESSAGE).unwrap_or_default()
}

#[tokio::test]
async fn invalid_json_yields_error_event() {
    let state = test_helpers::test_app_state();
    let (tx, _rx) = mpsc::channel(8);
    let mut current = None;

    let replies = dispatch(&state, &mut current, Uuid::new_v4(), Uuid::new_v4(), &tx, "not json").await;
    assert!(error_message(&replies).starts_with("invalid json"));
    assert!(current.is_none());
}

#[tokio::test]
async fn unknown_event_yields_error_event() {
    let state = test_helpers::test_app_state();
    let (tx, _rx) = mpsc::channel(8);
    let mut current = None;

    let replies = dispatch(
        &state,
        &mut current,
        Uuid::new_v4(),
        Uuid::new_v4(),
        &tx,
        r#"{"event":"open-the-pod-bay-doors"}"#,
    )
    .await;
    assert_eq!(error_message(&replies), "unknown event: open-the-pod-bay-doors");
}

#[tokio::test]
async fn join_requires_group_id() {
    let state = test_helpers::test_app_state();
    let (tx, _rx) = mpsc::channel(8);
    let mut current = None;

    let replies = dispatch(
        &state,
        &mut current,
        Uuid::new_v4(),
        Uuid::new_v4(),
        &tx,
        r#"{"event":"join-voting-session","data":{}}"#,
    )
    .await;
    assert_eq!(error_message(&replies), "groupId required");
    assert!(current.is_none());
}

#[tokio::test]
async fn join_rejects_malformed_group_id() {
    let state = test_helpers::test_app_state();
    let (tx, _rx) = mpsc::channel(8);
    let mut current = None;

    let replies = dispatch(
        &state,
        &mut current,
        Uuid::new_v4(),
        Uuid::new_v4(),
        &tx,
        r#"{"event":"join-voting-session","data":{"groupId":"not-a-uuid"}}"#,
    )
    .await;
    assert_eq!(error_message(&replies), "groupId required");
}

#[tokio::test]
async fn vote_before_join_is_rejected() {
    let state = test_helpers::test_app_state();
    let (tx, _rx) = mpsc::channel(8);
    let mut current = None;

    let replies = dispatch(
        &state,
        &mut current,
        Uuid::new_v4(),
        Uuid::new_v4(),
        &tx,
        r#"{"event":"vote-movie","data":{"movieId":"603","vote":"yes"}}"#,
    )
    .await;
    assert_eq!(error_message(&replies), "not in a voting session");
}

#[tokio::test]
async fn vote_requires_movie_id_and_valid_choice() {
    let state = test_helpers::test_app_state();
    let (tx, _rx) = mpsc::channel(8);
    let mut current = Some(Uuid::new_v4());

    let replies = dispatch(
        &state,
        &mut current,
        Uuid::new_v4(),
        Uuid::new_v4(),
        &tx,
        r#"{"event":"vote-movie","data":{"vote":"yes"}}"#,
    )
    .await;
    assert_eq!(error_message(&replies), "movieId required");

    let replies = dispatch(
        &state,
        &mut current,
        Uuid::new_v4(),
        Uuid::new_v4(),
        &tx,
        r#"{"event":"vote-movie","data":{"movieId":"603","vote":"maybe"}}"#,
    )
    .await;
    assert_eq!(error_message(&replies), "vote must be \"yes\" or \"no\"");
}

#[tokio::test]
async fn start_without_group_context_is_rejected() {
    let state = test_helpers::test_app_state();
    let (tx, _rx) = mpsc::channel(8);
    let mut current = None;

    let replies = dispatch(
        &state,
        &mut current,
        Uuid::new_v4(),
        Uuid::new_v4(),
        &tx,
        r#"{"event":"start-voting-session","data":{}}"#,
    )
    .await;
    assert_eq!(error_message(&replies), "groupId required");
}

#[tokio::test]
async fn leave_without_room_is_quiet() {
    let state = test_helpers::test_app_state();
    let (tx, _rx) = mpsc::channel(8);
    let mut current = None;

    let replies = dispatch(
        &state,
        &mut current,
        Uuid::new_v4(),
        Uuid::new_v4(),
        &tx,
        r#"{"event":"leave-voting-session"}"#,
    )
    .await;
    assert!(replies.is_empty());
}

#[tokio::test]
async fn leave_announces_to_remaining_members() {
    let state = test_helpers::test_app_state();
    let group_id = test_helpers::seed_room(&state).await;

    let leaver_conn = Uuid::new_v4();
    let leaver_user = Uuid::new_v4();
    let (leaver_tx, mut leaver_rx) = mpsc::channel(8);
    let (peer_tx, mut peer_rx) = mpsc::channel(8);
    crate::services::room::register(&state, group_id, leaver_conn, leaver_user, leaver_tx).await;
    crate::services::room::register(&state, group_id, Uuid::new_v4(), Uuid::new_v4(), peer_tx).await;

    let mut current = Some(group_id);
    let replies = dispatch(
        &state,
        &mut current,
        leaver_conn,
        leaver_user,
        &mpsc::channel(8).0,
        r#"{"event":"leave-voting-session"}"#,
    )
    .await;
    assert!(replies.is_empty());
    assert!(current.is_none());

    let notice = timeout(Duration::from_millis(200), peer_rx.recv())
        .await
        .expect("peer notice timed out")
        .expect("peer channel closed");
    assert_eq!(notice.event, event::USER_LEFT);
    assert_eq!(notice.str_field("userId"), Some(leaver_user.to_string().as_str()));

    // The leaver gets no echo of their own departure.
    assert!(timeout(Duration::from_millis(80), leaver_rx.recv()).await.is_err());
}
