//! Shared local broadcast channel
//!
//! Every chat store and simulator instance in the process publishes and
//! subscribes on the same bus. Delivery is fan-out to all subscribers,
//! including the publishing instance; receivers deduplicate by message id.

use tokio::sync::broadcast;

use crate::models::BroadcastEnvelope;

/// Buffered envelopes per subscriber before lagging kicks in
const CHANNEL_CAPACITY: usize = 64;

/// Fan-out channel shared by all chat participants on this machine
#[derive(Clone)]
pub struct BroadcastBus {
    tx: broadcast::Sender<BroadcastEnvelope>,
}

impl BroadcastBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn sender(&self) -> broadcast::Sender<BroadcastEnvelope> {
        self.tx.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEnvelope> {
        self.tx.subscribe()
    }

    /// Deliver an envelope to every current subscriber. Returns how many
    /// subscribers received it; an empty bus is not an error.
    pub fn publish(&self, envelope: BroadcastEnvelope) -> usize {
        match self.tx.send(envelope) {
            Ok(count) => count,
            Err(_) => {
                log::debug!("envelope published to an empty bus");
                0
            }
        }
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BroadcastEnvelope, EnvelopePayload};

    #[tokio::test]
    async fn envelopes_fan_out_to_all_subscribers() {
        let bus = BroadcastBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        assert_eq!(bus.publish(BroadcastEnvelope::user_joined("Ana")), 2);

        for rx in [&mut a, &mut b] {
            let env = rx.recv().await.unwrap();
            match env.payload {
                EnvelopePayload::UserJoined(p) => assert_eq!(p.nickname, "Ana"),
                other => panic!("unexpected payload: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_not_an_error() {
        let bus = BroadcastBus::new();
        assert_eq!(bus.publish(BroadcastEnvelope::user_left("Ana")), 0);
    }
}
