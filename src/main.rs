//! Padlink CLI - Rust implementation
//!
//! Hardware bring-up tool for the pad controller and sample box protocol:
//! sample transfer, playback control, state queries, LED/OLED checks.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use padlink::config::AppConfig;
use padlink::display::Frame;
use padlink::link::{next_event, ControllerSurface, SamplerLink, StateEvent};
use padlink::monitor;
use padlink::transport::MidiTransport;

/// Padlink - talk to the pad controller and sample box over SysEx
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List available MIDI ports
    ListPorts,

    /// Upload a sample file into a slot
    Upload {
        file: String,
        #[arg(short, long)]
        slot: u8,
        #[arg(short, long, default_value_t = 0)]
        program: u8,
    },

    /// Download the sample stored in a slot
    Download {
        #[arg(short, long)]
        slot: u8,
        /// Output file path
        out: String,
    },

    /// Start playback of a slot
    Play {
        slot: u8,
        #[arg(long)]
        looped: bool,
    },

    /// Stop playback of a slot
    Stop { slot: u8 },

    /// Mute or unmute a slot
    Mute {
        slot: u8,
        #[arg(long)]
        off: bool,
    },

    /// Solo or unsolo a slot
    Solo {
        slot: u8,
        #[arg(long)]
        off: bool,
    },

    /// Clear a slot
    Clear { slot: u8 },

    /// Query the sequencer state
    Sequencer,

    /// Query the mixer state
    Mixer,

    /// Query the deck state
    Decks,

    /// Monitor MIDI traffic (all ports, or those matching a pattern)
    Monitor {
        #[arg(default_value = "")]
        pattern: String,
    },

    /// Set a pad or button LED to a logical color code
    Led { note: u8, value: u8 },

    /// Fill the OLED completely on or off
    OledFill {
        #[arg(long)]
        off: bool,
    },

    /// Emulate a momentary button press on the controller
    Tap { note: u8 },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    init_logging(&args.log_level)?;

    match args.command {
        Command::ListPorts => {
            monitor::list_ports_formatted();
            Ok(())
        }
        Command::Monitor { pattern } => monitor::run_monitor(&pattern).await,
        command => run_device_command(&args.config, command).await,
    }
}

async fn run_device_command(config_path: &str, command: Command) -> Result<()> {
    let config = AppConfig::load(config_path).await?;

    match command {
        Command::Upload { file, slot, program } => {
            let data = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read sample file: {}", file))?;

            let (link, _events) = connect_sampler(&config)?;
            info!("Uploading {} ({} bytes) into slot {}", file, data.len(), slot);

            link.upload(slot, program, &data, |done, total| {
                print!("\rUploading chunk {}/{}", done, total);
                let _ = std::io::stdout().flush();
            })
            .await?;

            println!("\nUpload complete");
            Ok(())
        }

        Command::Download { slot, out } => {
            let (link, _events) = connect_sampler(&config)?;

            let data = link
                .download(slot, |done, total| {
                    print!("\rDownloading chunk {}/{}", done, total);
                    let _ = std::io::stdout().flush();
                })
                .await?;

            tokio::fs::write(&out, &data)
                .await
                .with_context(|| format!("Failed to write sample file: {}", out))?;

            println!("\nDownloaded {} bytes to {}", data.len(), out);
            Ok(())
        }

        Command::Play { slot, looped } => {
            let (link, _events) = connect_sampler(&config)?;
            link.play(slot, looped).await
        }

        Command::Stop { slot } => {
            let (link, _events) = connect_sampler(&config)?;
            link.stop(slot).await
        }

        Command::Mute { slot, off } => {
            let (link, _events) = connect_sampler(&config)?;
            link.mute(slot, !off).await
        }

        Command::Solo { slot, off } => {
            let (link, _events) = connect_sampler(&config)?;
            link.solo(slot, !off).await
        }

        Command::Clear { slot } => {
            let (link, _events) = connect_sampler(&config)?;
            link.clear_slot(slot).await
        }

        Command::Sequencer => {
            let (link, mut events) = connect_sampler(&config)?;
            link.request_sequencer_state().await?;
            print_next_state(&mut events).await
        }

        Command::Mixer => {
            let (link, mut events) = connect_sampler(&config)?;
            link.request_mixer_state().await?;
            print_next_state(&mut events).await
        }

        Command::Decks => {
            let (link, mut events) = connect_sampler(&config)?;
            link.request_deck_state().await?;
            print_next_state(&mut events).await
        }

        Command::Led { note, value } => {
            let mut surface = connect_controller(&config)?;
            let sent = surface.set_led(note, value).await?;
            println!("LED {} -> {} ({})", note, value, if sent { "sent" } else { "cached" });
            Ok(())
        }

        Command::OledFill { off } => {
            let mut surface = connect_controller(&config)?;
            let mut frame = Frame::new();
            frame.fill(!off);
            let stripes = surface.draw(&frame).await?;
            println!("Sent {} stripe(s)", stripes);
            Ok(())
        }

        Command::Tap { note } => {
            let surface = connect_controller(&config)?;
            let release = surface.tap(note).await?;
            release.await?;
            println!("Tapped {}", note);
            Ok(())
        }

        Command::ListPorts | Command::Monitor { .. } => unreachable!("handled in main"),
    }
}

fn connect_sampler(config: &AppConfig) -> Result<(SamplerLink, mpsc::Receiver<StateEvent>)> {
    let (transport, incoming) =
        MidiTransport::connect(&config.sampler.input_port, &config.sampler.output_port)?;
    let link = SamplerLink::new(Arc::new(transport), config.sampler.device_id);
    let events = link.start_dispatch(incoming);
    Ok((link, events))
}

fn connect_controller(config: &AppConfig) -> Result<ControllerSurface> {
    let controller = config
        .controller
        .as_ref()
        .context("No controller section in config")?;

    let (transport, _incoming) =
        MidiTransport::connect(&controller.input_port, &controller.output_port)?;
    Ok(ControllerSurface::new(
        Arc::new(transport),
        controller.device_id,
        controller.led_channel,
    ))
}

async fn print_next_state(events: &mut mpsc::Receiver<StateEvent>) -> Result<()> {
    match next_event(events, Duration::from_millis(3000)).await {
        Some(StateEvent::Sequencer(snapshot)) => println!("{:#?}", snapshot),
        Some(StateEvent::Mixer(snapshot)) => println!("{:#?}", snapshot),
        Some(StateEvent::Deck(snapshot)) => println!("{:#?}", snapshot),
        None => anyhow::bail!("No state response from device"),
    }
    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}
