//! ChatVoz - Voice chat with recording, playback and simulated peers
//!
//! This is the main entry point for the ChatVoz application.

mod cli;

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use log::info;

use chatvoz::audio::{self, format_time, AudioPlayer, PlaybackRate, VoiceRecorder};
use chatvoz::chat::{BroadcastBus, ChatStore};
use chatvoz::settings::Settings;
use chatvoz::simulator::MessageSimulator;
use chatvoz::synth;
use cli::Command;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments and initialize logging
    let args = cli::Args::parse();
    cli::init_logging(&args);

    let settings = Settings::load();

    match args.command {
        Command::Record {
            output,
            max_seconds,
        } => record(&output, max_seconds.unwrap_or(settings.max_recording_secs)).await,
        Command::Play {
            input,
            rate,
            volume,
        } => play(&input, rate, volume).await,
        Command::Synth { duration, output } => synth_clip(duration, &output),
        Command::Chat {
            nickname,
            no_simulate,
        } => chat_session(settings, nickname, no_simulate).await,
    }
}

/// Record from the microphone until Enter is pressed or the cap is hit.
async fn record(output: &Path, max_seconds: f64) -> anyhow::Result<()> {
    let recorder = VoiceRecorder::pipewire().with_max_seconds(max_seconds);

    if !recorder.start() {
        match recorder.error() {
            Some(e) => bail!("could not start recording: {}", e),
            None => bail!("could not start recording"),
        }
    }
    println!(
        "Recording (up to {:.0}s), press Enter to stop...",
        max_seconds
    );

    // Detached thread so a never-arriving Enter cannot hang shutdown
    let (enter_tx, enter_rx) = tokio::sync::oneshot::channel();
    std::thread::spawn(move || {
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
        let _ = enter_tx.send(());
    });
    tokio::pin!(enter_rx);

    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    let audio = loop {
        tokio::select! {
            _ = &mut enter_rx => {
                // Enter may race the cap; the auto-stop path parks its result
                break recorder.stop().or_else(|| recorder.take_finished());
            }
            _ = ticker.tick() => {
                // The cap tick finalizes on its own; pick up the result
                if !recorder.is_recording() {
                    break recorder.take_finished();
                }
            }
        }
    };
    recorder.cleanup();

    let audio = match audio {
        Some(bytes) => bytes,
        None => match recorder.error() {
            Some(e) => bail!("recording failed: {}", e),
            None => bail!("recording produced no audio"),
        },
    };

    let seconds = audio::codec::decode_wav(&audio)
        .map(|(samples, rate)| audio::codec::duration_seconds(samples.len(), rate))
        .unwrap_or(0.0);
    fs::write(output, &audio)
        .with_context(|| format!("writing {}", output.display()))?;
    println!("Saved {:.1}s to {}", seconds, output.display());
    Ok(())
}

/// Load a WAV file and play it to completion.
async fn play(input: &Path, rate: f32, volume: f32) -> anyhow::Result<()> {
    let Some(rate) = PlaybackRate::from_f32(rate) else {
        bail!("unsupported playback rate, use 1, 1.5 or 2");
    };

    let bytes = fs::read(input).with_context(|| format!("reading {}", input.display()))?;

    let player = AudioPlayer::pipewire();
    player.set_playback_rate(rate);
    player.set_volume(volume);

    if !player.load(&bytes).await {
        match player.error() {
            Some(e) => bail!("could not load {}: {}", input.display(), e),
            None => bail!("could not load {}", input.display()),
        }
    }
    info!(
        "Loaded {} ({})",
        input.display(),
        player.formatted_duration()
    );

    if !player.play() {
        match player.error() {
            Some(e) => bail!("playback failed: {}", e),
            None => bail!("playback failed"),
        }
    }

    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    while player.is_playing() {
        ticker.tick().await;
        print!(
            "\r{} / {}  ",
            player.formatted_current_time(),
            player.formatted_duration()
        );
        use std::io::Write;
        let _ = std::io::stdout().flush();
    }
    println!();
    player.cleanup();

    if let Some(e) = player.error() {
        bail!("playback failed: {}", e);
    }
    Ok(())
}

/// Generate a synthetic voice-like clip and write it out.
fn synth_clip(duration: f64, output: &Path) -> anyhow::Result<()> {
    if !duration.is_finite() || duration <= 0.0 {
        bail!("duration must be a positive number of seconds");
    }
    let audio = synth::generate(duration);
    fs::write(output, &audio)
        .with_context(|| format!("writing {}", output.display()))?;
    println!("Wrote {:.1}s synthetic clip to {}", duration, output.display());
    Ok(())
}

/// Join the local chat, printing messages as they arrive, until Ctrl-C.
async fn chat_session(
    mut settings: Settings,
    nickname: Option<String>,
    no_simulate: bool,
) -> anyhow::Result<()> {
    let nickname = nickname.unwrap_or_else(|| settings.nickname.clone());
    if nickname.trim().is_empty() {
        bail!("a nickname is required, pass --nickname or set it in settings");
    }

    let bus = BroadcastBus::new();
    let store = ChatStore::new();
    if !store.login(&nickname) {
        bail!("nickname must be 3 to 20 characters");
    }

    // Remember the nickname for the next session
    if settings.nickname != store.nickname() {
        settings.nickname = store.nickname();
        if let Err(e) = settings.save() {
            log::warn!("could not persist settings: {}", e);
        }
    }
    store.connect(&bus);
    println!("Joined the chat as {}", store.nickname());

    let simulator = MessageSimulator::new(&bus);
    if !no_simulate && settings.simulate_on_start {
        simulator.start();
        println!("Message simulation is on");
    }

    let mut seen = 0usize;
    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                // Arrival order, so late-timestamped envelopes still print
                let messages = store.messages();
                for message in &messages[seen.min(messages.len())..] {
                    println!(
                        "[{}] {} sent a voice message ({})",
                        message.timestamp.format("%H:%M:%S"),
                        message.nickname,
                        format_time(message.duration)
                    );
                }
                seen = messages.len();
            }
        }
    }

    simulator.cleanup();
    store.cleanup();
    println!("\nLeft the chat");
    Ok(())
}
