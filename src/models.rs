//! Core data types: voice messages, the cross-instance wire envelope and
//! the nickname provider consumed by message distribution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bounds for a display nickname, applied after trimming
pub const NICKNAME_MIN_CHARS: usize = 3;
pub const NICKNAME_MAX_CHARS: usize = 20;

/// A delivered, playable voice clip
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceMessage {
    /// Unique within a session, generated at creation
    pub id: String,
    /// Display name of the sender
    pub nickname: String,
    /// Raw WAV container bytes
    pub audio: Vec<u8>,
    /// Authoritative clip length in seconds
    pub duration: f64,
    /// Creation time, used for chronological ordering
    pub timestamp: DateTime<Utc>,
    /// True on the sender's local copy, false on received copies
    pub is_own: bool,
}

impl VoiceMessage {
    pub fn new(
        id: String,
        nickname: String,
        audio: Vec<u8>,
        duration: f64,
        is_own: bool,
    ) -> Self {
        Self {
            id,
            nickname,
            audio,
            duration,
            timestamp: Utc::now(),
            is_own,
        }
    }
}

/// Generate a message id: prefix, millisecond timestamp, random suffix
pub fn generate_message_id(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}",
        prefix,
        Utc::now().timestamp_millis(),
        &suffix[..9]
    )
}

/// Payload of a broadcast envelope, tagged on the wire as
/// `{ "type": ..., "data": ... }`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EnvelopePayload {
    VoiceMessage(VoiceMessage),
    UserJoined(Presence),
    UserLeft(Presence),
}

/// Presence notification payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Presence {
    pub nickname: String,
}

/// Wire-level value exchanged across chat instances
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastEnvelope {
    #[serde(flatten)]
    pub payload: EnvelopePayload,
    /// Envelope send time, distinct from the message timestamp
    pub timestamp: DateTime<Utc>,
}

impl BroadcastEnvelope {
    pub fn voice_message(message: VoiceMessage) -> Self {
        Self {
            payload: EnvelopePayload::VoiceMessage(message),
            timestamp: Utc::now(),
        }
    }

    pub fn user_joined(nickname: impl Into<String>) -> Self {
        Self {
            payload: EnvelopePayload::UserJoined(Presence {
                nickname: nickname.into(),
            }),
            timestamp: Utc::now(),
        }
    }

    pub fn user_left(nickname: impl Into<String>) -> Self {
        Self {
            payload: EnvelopePayload::UserLeft(Presence {
                nickname: nickname.into(),
            }),
            timestamp: Utc::now(),
        }
    }
}

/// Nickname provider required before messages can be sent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserProfile {
    pub nickname: String,
    pub is_logged_in: bool,
}

impl UserProfile {
    /// Trim and validate the nickname, then mark the profile logged in.
    /// Returns false (profile untouched) when validation fails.
    pub fn login(&mut self, nickname: &str) -> bool {
        let trimmed = nickname.trim();
        if !Self::validate_nickname(trimmed) {
            return false;
        }
        self.nickname = trimmed.to_string();
        self.is_logged_in = true;
        true
    }

    pub fn logout(&mut self) {
        self.nickname.clear();
        self.is_logged_in = false;
    }

    /// A nickname is 3 to 20 characters after trimming
    pub fn validate_nickname(nickname: &str) -> bool {
        let len = nickname.trim().chars().count();
        (NICKNAME_MIN_CHARS..=NICKNAME_MAX_CHARS).contains(&len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_ids_carry_prefix_and_differ() {
        let a = generate_message_id("msg");
        let b = generate_message_id("msg");
        assert!(a.starts_with("msg_"));
        assert_ne!(a, b);
    }

    #[test]
    fn nickname_bounds() {
        assert!(!UserProfile::validate_nickname("ab"));
        assert!(UserProfile::validate_nickname("abc"));
        assert!(UserProfile::validate_nickname("  abc  "));
        assert!(UserProfile::validate_nickname(&"x".repeat(20)));
        assert!(!UserProfile::validate_nickname(&"x".repeat(21)));
        assert!(!UserProfile::validate_nickname("  a  "));
    }

    #[test]
    fn login_trims_and_validates() {
        let mut user = UserProfile::default();
        assert!(!user.login("ab"));
        assert!(!user.is_logged_in);
        assert!(user.login("  Carlos  "));
        assert!(user.is_logged_in);
        assert_eq!(user.nickname, "Carlos");
        user.logout();
        assert!(!user.is_logged_in);
        assert!(user.nickname.is_empty());
    }

    #[test]
    fn envelope_wire_shape() {
        let msg = VoiceMessage::new("m1".into(), "Ana".into(), vec![1, 2], 1.5, false);
        let env = BroadcastEnvelope::voice_message(msg);
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["type"], "voice_message");
        assert_eq!(json["data"]["id"], "m1");
        assert_eq!(json["data"]["nickname"], "Ana");
        assert!(json["timestamp"].is_string());

        let joined = serde_json::to_value(BroadcastEnvelope::user_joined("Ana")).unwrap();
        assert_eq!(joined["type"], "user_joined");
        assert_eq!(joined["data"]["nickname"], "Ana");

        let back: BroadcastEnvelope = serde_json::from_value(json).unwrap();
        match back.payload {
            EnvelopePayload::VoiceMessage(m) => assert_eq!(m.id, "m1"),
            other => panic!("unexpected payload: {:?}", other),
        }
    }
}
