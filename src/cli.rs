//! Command-line interface for ChatVoz
//!
//! Handles argument parsing and logging configuration.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::LevelFilter;

/// ChatVoz - Voice chat with recording, playback and simulated peers
#[derive(Parser, Debug)]
#[command(name = "chatvoz")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Increase logging verbosity
    /// -v = debug, -vv = trace, -vvv = all deps
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Record a voice clip from the microphone into a WAV file
    Record {
        /// Output path for the recorded clip
        #[arg(default_value = "recording.wav")]
        output: PathBuf,

        /// Maximum recording length in seconds
        #[arg(long)]
        max_seconds: Option<f64>,
    },
    /// Play a WAV file
    Play {
        /// Clip to play
        input: PathBuf,

        /// Playback rate (1, 1.5 or 2)
        #[arg(long, default_value_t = 1.0)]
        rate: f32,

        /// Volume, 0.0 to 1.0
        #[arg(long, default_value_t = 1.0)]
        volume: f32,
    },
    /// Generate a synthetic voice-like clip
    Synth {
        /// Clip length in seconds
        #[arg(default_value_t = 3.0)]
        duration: f64,

        /// Output path
        #[arg(default_value = "synth.wav")]
        output: PathBuf,
    },
    /// Join the local voice chat
    Chat {
        /// Nickname to log in with (3 to 20 characters)
        #[arg(long)]
        nickname: Option<String>,

        /// Disable the message simulator
        #[arg(long)]
        no_simulate: bool,
    },
}

impl Args {
    /// Get the log level filter based on verbosity flags
    pub fn log_level(&self) -> LevelFilter {
        if self.quiet {
            LevelFilter::Error
        } else {
            match self.verbose {
                0 => LevelFilter::Info,
                1 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }
}

/// Initialize the logging system based on CLI arguments
pub fn init_logging(args: &Args) {
    let mut builder = env_logger::Builder::new();

    // Base level for all modules - keep at warn to suppress noisy deps
    builder.filter_level(LevelFilter::Warn);

    // Set chatvoz modules to requested verbosity level
    builder.filter_module("chatvoz", args.log_level());

    // PipeWire internals only at -vvv
    if args.verbose >= 3 {
        builder.filter_module("pipewire", args.log_level());
    }

    builder.format_timestamp_millis().init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_to_levels() {
        let parse = |argv: &[&str]| Args::try_parse_from(argv).unwrap();

        assert_eq!(parse(&["chatvoz", "synth"]).log_level(), LevelFilter::Info);
        assert_eq!(
            parse(&["chatvoz", "-v", "synth"]).log_level(),
            LevelFilter::Debug
        );
        assert_eq!(
            parse(&["chatvoz", "-vv", "synth"]).log_level(),
            LevelFilter::Trace
        );
        assert_eq!(
            parse(&["chatvoz", "-q", "synth"]).log_level(),
            LevelFilter::Error
        );
    }

    #[test]
    fn subcommands_parse() {
        let args = Args::try_parse_from(["chatvoz", "record", "out.wav", "--max-seconds", "10"])
            .unwrap();
        match args.command {
            Command::Record { output, max_seconds } => {
                assert_eq!(output, PathBuf::from("out.wav"));
                assert_eq!(max_seconds, Some(10.0));
            }
            other => panic!("unexpected command: {:?}", other),
        }

        let args = Args::try_parse_from(["chatvoz", "chat", "--nickname", "Ana", "--no-simulate"])
            .unwrap();
        match args.command {
            Command::Chat { nickname, no_simulate } => {
                assert_eq!(nickname.as_deref(), Some("Ana"));
                assert!(no_simulate);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
