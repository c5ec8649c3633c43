//! Simulated incoming voice traffic
//!
//! Periodically publishes synthetic voice messages on the shared bus so a
//! single participant still sees a busy chat. The sender names and phrase
//! list are cosmetic configuration; the waveform comes from the synthetic
//! generator and does not depend on the text.

use std::ops::Range;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::chat::BroadcastBus;
use crate::models::{generate_message_id, BroadcastEnvelope, VoiceMessage};
use crate::synth;

/// Scheduling and content knobs for the simulator
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub senders: Vec<String>,
    pub phrases: Vec<String>,
    /// Delay before the first message
    pub initial_delay: Duration,
    /// Random pause between messages
    pub message_interval: Range<Duration>,
    /// Random clip length in seconds
    pub duration_secs: Range<f64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            senders: ["Ana", "Carlos", "María", "Juan", "Laura"]
                .map(String::from)
                .to_vec(),
            phrases: [
                "Hello, how is everyone?",
                "What a day!",
                "Hope you are all well",
                "See you soon",
                "Great teamwork!",
                "Thanks for the info",
                "Can anyone help me?",
                "Perfect, understood",
                "Sounds like a good idea",
                "Talk later",
            ]
            .map(String::from)
            .to_vec(),
            initial_delay: Duration::from_secs(3),
            message_interval: Duration::from_secs(5)..Duration::from_secs(15),
            duration_secs: 2.0..10.0,
        }
    }
}

/// Publishes synthetic `voice_message` envelopes on a schedule
#[derive(Clone)]
pub struct MessageSimulator {
    inner: Arc<Mutex<SimulatorInner>>,
}

struct SimulatorInner {
    config: SimulatorConfig,
    tx: broadcast::Sender<BroadcastEnvelope>,
    is_simulating: bool,
    task: Option<JoinHandle<()>>,
}

impl MessageSimulator {
    pub fn new(bus: &BroadcastBus) -> Self {
        Self::with_config(bus, SimulatorConfig::default())
    }

    pub fn with_config(bus: &BroadcastBus, config: SimulatorConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SimulatorInner {
                config,
                tx: bus.sender(),
                is_simulating: false,
                task: None,
            })),
        }
    }

    pub fn is_simulating(&self) -> bool {
        self.inner.lock().unwrap().is_simulating
    }

    /// Begin publishing simulated messages.
    pub fn start(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.is_simulating {
            return;
        }
        inner.is_simulating = true;

        let simulator = self.clone();
        let initial_delay = inner.config.initial_delay;
        inner.task = Some(tokio::spawn(async move {
            tokio::time::sleep(initial_delay).await;
            loop {
                if !simulator.is_simulating() {
                    break;
                }
                simulator.send_mock_message();
                let pause = {
                    let inner = simulator.inner.lock().unwrap();
                    let range = inner.config.message_interval.clone();
                    rand::thread_rng().gen_range(range.start..range.end)
                };
                tokio::time::sleep(pause).await;
            }
        }));

        log::info!("message simulation started");
    }

    /// Stop publishing; the in-flight pause is cancelled.
    pub fn stop(&self) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.is_simulating {
            return;
        }
        inner.is_simulating = false;
        if let Some(task) = inner.task.take() {
            task.abort();
        }
        log::info!("message simulation stopped");
    }

    pub fn toggle(&self) {
        if self.is_simulating() {
            self.stop();
        } else {
            self.start();
        }
    }

    /// Build and publish one simulated message immediately.
    pub fn send_mock_message(&self) {
        let (tx, message) = {
            let inner = self.inner.lock().unwrap();
            (inner.tx.clone(), build_mock_message(&inner.config))
        };
        log::info!(
            "simulated message from {} ({:.0}s)",
            message.nickname,
            message.duration
        );
        if tx.send(BroadcastEnvelope::voice_message(message)).is_err() {
            log::debug!("no listeners for simulated message");
        }
    }

    pub fn cleanup(&self) {
        self.stop();
    }
}

/// Assemble one synthetic message from the configured content tables.
fn build_mock_message(config: &SimulatorConfig) -> VoiceMessage {
    let mut rng = rand::thread_rng();
    let nickname = config
        .senders
        .choose(&mut rng)
        .cloned()
        .unwrap_or_else(|| "Anon".to_string());
    // The phrase is cosmetic only; the waveform ignores it
    let _phrase = config.phrases.choose(&mut rng);
    let duration = rng.gen_range(config.duration_secs.start..config.duration_secs.end);

    let audio = synth::generate(duration);
    VoiceMessage::new(
        generate_message_id("sim"),
        nickname,
        audio,
        duration,
        false,
    )
}
