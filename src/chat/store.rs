//! Message distribution and the local message collection
//!
//! Publishes finished recordings as `voice_message` envelopes and rebuilds
//! `VoiceMessage`s from envelopes received on the shared bus. The
//! collection is append-only with id-based deduplication; explicit clear
//! drops the payload buffers.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::chat::channel::BroadcastBus;
use crate::error::{AudioError, AudioResult};
use crate::models::{
    generate_message_id, BroadcastEnvelope, EnvelopePayload, UserProfile, VoiceMessage,
};

/// One participant's view of the chat
#[derive(Clone)]
pub struct ChatStore {
    inner: Arc<Mutex<StoreInner>>,
}

struct StoreInner {
    user: UserProfile,
    messages: Vec<VoiceMessage>,
    is_connected: bool,
    tx: Option<broadcast::Sender<BroadcastEnvelope>>,
    recv_task: Option<JoinHandle<()>>,
}

impl ChatStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner {
                user: UserProfile::default(),
                messages: Vec::new(),
                is_connected: false,
                tx: None,
                recv_task: None,
            })),
        }
    }

    /// Validate and install the nickname for this participant.
    pub fn login(&self, nickname: &str) -> bool {
        self.inner.lock().unwrap().user.login(nickname)
    }

    pub fn nickname(&self) -> String {
        self.inner.lock().unwrap().user.nickname.clone()
    }

    pub fn is_logged_in(&self) -> bool {
        self.inner.lock().unwrap().user.is_logged_in
    }

    /// Subscribe to the shared bus and announce presence.
    pub fn connect(&self, bus: &BroadcastBus) {
        let nickname = {
            let mut inner = self.inner.lock().unwrap();
            if inner.is_connected {
                return;
            }
            inner.tx = Some(bus.sender());
            inner.is_connected = true;
            inner.user.nickname.clone()
        };

        let store = self.clone();
        let mut rx = bus.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => store.apply_envelope(envelope),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        log::warn!("chat bus lagged, {} envelopes dropped", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.inner.lock().unwrap().recv_task = Some(task);

        if !nickname.is_empty() {
            bus.publish(BroadcastEnvelope::user_joined(nickname));
        }
        log::info!("chat store connected to the local bus");
    }

    /// Handle one incoming envelope. Public so delivery can also be driven
    /// directly, e.g. when replaying envelopes.
    pub fn apply_envelope(&self, envelope: BroadcastEnvelope) {
        match envelope.payload {
            EnvelopePayload::VoiceMessage(message) => self.add_message(message),
            EnvelopePayload::UserJoined(p) => log::info!("{} joined the chat", p.nickname),
            EnvelopePayload::UserLeft(p) => log::info!("{} left the chat", p.nickname),
        }
    }

    /// Append a message unless its id is already present.
    pub fn add_message(&self, message: VoiceMessage) {
        let mut inner = self.inner.lock().unwrap();
        if inner.messages.iter().any(|m| m.id == message.id) {
            log::debug!("duplicate message {} ignored", message.id);
            return;
        }
        inner.messages.push(message);
    }

    /// Publish a finished recording.
    ///
    /// The local copy is stored with `is_own = true`; the broadcast copy
    /// carries `is_own = false` because the flag describes the receiver's
    /// perspective. Requires a logged-in user and an initialized channel.
    pub fn send_message(&self, audio: Vec<u8>, duration: f64) -> AudioResult<VoiceMessage> {
        let (tx, message) = {
            let mut inner = self.inner.lock().unwrap();
            if !inner.user.is_logged_in {
                return Err(AudioError::InvalidInput("user not logged in".into()));
            }
            let Some(tx) = inner.tx.clone() else {
                return Err(AudioError::InvalidInput(
                    "broadcast channel not initialized".into(),
                ));
            };

            let message = VoiceMessage {
                id: generate_message_id("msg"),
                nickname: inner.user.nickname.clone(),
                audio,
                duration,
                timestamp: Utc::now(),
                is_own: true,
            };
            inner.messages.push(message.clone());
            (tx, message)
        };

        let mut wire = message.clone();
        wire.is_own = false;
        if tx.send(BroadcastEnvelope::voice_message(wire)).is_err() {
            log::debug!("no listeners on the chat bus");
        }

        log::debug!("sent voice message {} ({:.1}s)", message.id, duration);
        Ok(message)
    }

    /// Messages in ascending timestamp order, regardless of arrival order.
    pub fn sorted_messages(&self) -> Vec<VoiceMessage> {
        let mut messages = self.inner.lock().unwrap().messages.clone();
        messages.sort_by_key(|m| m.timestamp);
        messages
    }

    pub fn messages(&self) -> Vec<VoiceMessage> {
        self.inner.lock().unwrap().messages.clone()
    }

    pub fn message_count(&self) -> usize {
        self.inner.lock().unwrap().messages.len()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().unwrap().is_connected
    }

    /// Drop all messages, releasing their payload buffers.
    pub fn clear_messages(&self) {
        self.inner.lock().unwrap().messages.clear();
    }

    /// Leave the bus: announce departure, stop receiving.
    pub fn disconnect(&self) {
        let (tx, nickname, task) = {
            let mut inner = self.inner.lock().unwrap();
            if !inner.is_connected {
                return;
            }
            inner.is_connected = false;
            (
                inner.tx.take(),
                inner.user.nickname.clone(),
                inner.recv_task.take(),
            )
        };
        if let (Some(tx), false) = (tx, nickname.is_empty()) {
            let _ = tx.send(BroadcastEnvelope::user_left(nickname));
        }
        if let Some(task) = task {
            task.abort();
        }
    }

    /// Idempotent full teardown.
    pub fn cleanup(&self) {
        self.clear_messages();
        self.disconnect();
    }
}

impl Default for ChatStore {
    fn default() -> Self {
        Self::new()
    }
}
