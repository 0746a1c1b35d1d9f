//! Event — the wire message type for the realtime voting channel.
//!
//! DESIGN
//! ======
//! Every message on the websocket is an Event: a name plus a flat JSON
//! payload. Clients send request events (`join-voting-session`,
//! `vote-movie`, ...), the server dispatches by name and fans the
//! corresponding notification out to the rest of the room.
//!
//! - Flat data: payload is always `Map<String, Value>`, never nested
//!   protocol structure (movie objects ride along as plain values).
//! - Payload keys are camelCase; they are part of the client contract.
//! - Failures go back to the originating connection as an `error` event
//!   carrying a grepable code, never broadcast to the room.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// =============================================================================
// EVENT NAMES
// =============================================================================

/// Client → server: register this connection in a group room.
pub const JOIN_SESSION: &str = "join-voting-session";
/// Client → server: cast or overwrite a vote for a candidate movie.
pub const VOTE_MOVIE: &str = "vote-movie";
/// Client → server: open the group's pending session for voting.
pub const START_SESSION: &str = "start-voting-session";
/// Client → server: close the group's live session and score it.
pub const END_SESSION: &str = "end-voting-session";
/// Client → server: leave the current room without disconnecting.
pub const LEAVE_SESSION: &str = "leave-voting-session";

/// Server → room: a member joined the room.
pub const USER_JOINED: &str = "user-joined-voting";
/// Server → room: a member voted on a movie.
pub const MOVIE_VOTED: &str = "movie-voted";
/// Server → room: the session transitioned pending → active.
pub const SESSION_STARTED: &str = "voting-session-started";
/// Server → room: the session completed; payload carries the winner.
pub const SESSION_ENDED: &str = "voting-session-ended";
/// Server → room: a member left the room or disconnected.
pub const USER_LEFT: &str = "user-left-voting";
/// Server → sender only: an operation failed.
pub const ERROR: &str = "error";

/// Payload key for error messages.
pub const EVENT_MESSAGE: &str = "message";

/// Payload key for grepable error codes.
pub const EVENT_CODE: &str = "code";

/// Payload key for server-stamped emit times (epoch milliseconds).
pub const EVENT_TIMESTAMP: &str = "timestamp";

// =============================================================================
// TYPES
// =============================================================================

/// Flat key-value payload. Alias to reduce noise in signatures.
pub type Data = HashMap<String, serde_json::Value>;

/// The wire message: a name plus a flat payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event: String,
    #[serde(default)]
    pub data: Data,
}

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code for structured `error` events.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

impl Event {
    /// Create an event with an empty payload.
    pub fn new(event: impl Into<String>) -> Self {
        Self { event: event.into(), data: Data::new() }
    }

    /// Create a server notification stamped with the emit time.
    pub fn notify(event: impl Into<String>) -> Self {
        Self::new(event).with_data(EVENT_TIMESTAMP, now_ms())
    }

    /// Create an `error` event from a plain message.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ERROR).with_data(EVENT_MESSAGE, message.into())
    }

    /// Create a structured `error` event from a typed error.
    pub fn error_from(err: &(impl ErrorCode + ?Sized)) -> Self {
        Self::new(ERROR)
            .with_data(EVENT_CODE, err.error_code())
            .with_data(EVENT_MESSAGE, err.to_string())
    }
}

// =============================================================================
// BUILDERS
// =============================================================================

impl Event {
    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_value(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }
}

// =============================================================================
// ACCESSORS
// =============================================================================

impl Event {
    /// Read a string payload field.
    #[must_use]
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    /// Read a UUID payload field (sent by clients as a string).
    #[must_use]
    pub fn uuid_field(&self, key: &str) -> Option<uuid::Uuid> {
        self.str_field(key).and_then(|s| s.parse().ok())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_has_empty_payload() {
        let event = Event::new(JOIN_SESSION);
        assert_eq!(event.event, "join-voting-session");
        assert!(event.data.is_empty());
    }

    #[test]
    fn notify_stamps_timestamp() {
        let event = Event::notify(USER_JOINED);
        let ts = event
            .data
            .get(EVENT_TIMESTAMP)
            .and_then(serde_json::Value::as_i64)
            .unwrap();
        assert!(ts > 0);
    }

    #[test]
    fn error_carries_message() {
        let event = Event::error("not in a voting session");
        assert_eq!(event.event, ERROR);
        assert_eq!(event.str_field(EVENT_MESSAGE), Some("not in a voting session"));
    }

    #[test]
    fn error_from_typed() {
        #[derive(Debug, thiserror::Error)]
        #[error("group not found")]
        struct GroupNotFound;

        impl ErrorCode for GroupNotFound {
            fn error_code(&self) -> &'static str {
                "E_GROUP_NOT_FOUND"
            }
        }

        let event = Event::error_from(&GroupNotFound);
        assert_eq!(event.event, ERROR);
        assert_eq!(event.str_field(EVENT_CODE), Some("E_GROUP_NOT_FOUND"));
        assert_eq!(event.str_field(EVENT_MESSAGE), Some("group not found"));
    }

    #[test]
    fn json_round_trip() {
        let original = Event::new(VOTE_MOVIE)
            .with_data("movieId", "603")
            .with_data("vote", "yes");

        let json = serde_json::to_string(&original).expect("serialize");
        let restored: Event = serde_json::from_str(&json).expect("deserialize");

        assert_eq!(restored.event, "vote-movie");
        assert_eq!(restored.str_field("movieId"), Some("603"));
        assert_eq!(restored.str_field("vote"), Some("yes"));
    }

    #[test]
    fn deserialize_tolerates_missing_data() {
        let restored: Event = serde_json::from_str(r#"{"event":"leave-voting-session"}"#).expect("deserialize");
        assert_eq!(restored.event, LEAVE_SESSION);
        assert!(restored.data.is_empty());
    }

    #[test]
    fn uuid_field_parses_and_rejects() {
        let id = uuid::Uuid::new_v4();
        let event = Event::new(JOIN_SESSION).with_data("groupId", id.to_string());
        assert_eq!(event.uuid_field("groupId"), Some(id));

        let bad = Event::new(JOIN_SESSION).with_data("groupId", "not-a-uuid");
        assert_eq!(bad.uuid_field("groupId"), None);
    }
}
