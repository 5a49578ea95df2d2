//! MIDI monitor for debugging and development
//!
//! Prints every message arriving on the selected input ports, with the
//! protocol command decoded where the frame belongs to our dialect.

use anyhow::Result;
use colored::*;
use midir::{MidiInput, MidiInputConnection};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::info;

use crate::midi::{format_hex, MidiMessage};
use crate::protocol::Message;

/// One captured message
#[derive(Debug, Clone)]
struct MonitorEvent {
    timestamp_ms: u64,
    port_name: String,
    data: Vec<u8>,
}

/// Monitor MIDI traffic on every port matching `pattern` (all ports when
/// empty) until Ctrl+C
pub async fn run_monitor(pattern: &str) -> Result<()> {
    println!("{}", "=== MIDI Monitor ===".bold().cyan());

    let (event_tx, mut event_rx) = mpsc::channel::<MonitorEvent>(1000);
    let start_time = Instant::now();

    let scanner = MidiInput::new("Padlink-Monitor")?;
    let port_names: Vec<String> = scanner
        .ports()
        .iter()
        .filter_map(|port| scanner.port_name(port).ok())
        .collect();

    let mut connections: Vec<MidiInputConnection<()>> = Vec::new();

    for (index, name) in port_names.iter().enumerate() {
        if !pattern.is_empty() && !name.to_lowercase().contains(&pattern.to_lowercase()) {
            continue;
        }

        info!("Connecting to: {}", name);

        // Each connection needs its own client instance
        let midi_in = MidiInput::new(&format!("Padlink-Monitor-{}", index))?;
        let port = match midi_in.ports().into_iter().nth(index) {
            Some(port) => port,
            None => continue,
        };

        let event_tx = event_tx.clone();
        let port_name = name.clone();
        let conn = midi_in
            .connect(
                &port,
                "Monitor",
                move |_timestamp, data, _| {
                    let event = MonitorEvent {
                        timestamp_ms: start_time.elapsed().as_millis() as u64,
                        port_name: port_name.clone(),
                        data: data.to_vec(),
                    };
                    let _ = event_tx.try_send(event);
                },
                (),
            )
            .map_err(|e| anyhow::anyhow!("Failed to connect to '{}': {}", name, e))?;

        connections.push(conn);
    }

    if connections.is_empty() {
        anyhow::bail!("No MIDI input ports matching '{}'", pattern);
    }

    println!("{}", "Monitoring MIDI traffic, Ctrl+C to exit".green());
    println!("{}", "Format: [timestamp] PORT | HEX => PARSED".dimmed());
    println!("{}\n", "─".repeat(80).dimmed());

    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => print_event(&event),
            _ = tokio::signal::ctrl_c() => {
                println!("\n{}", "Monitor stopped".yellow());
                return Ok(());
            }
        }
    }
}

fn print_event(event: &MonitorEvent) {
    let decoded = decode(&event.data);
    println!(
        "[{:08}ms] {} | {}{}",
        event.timestamp_ms,
        event.port_name.blue(),
        format_hex(&event.data),
        decoded
    );
}

/// Best-effort decode: our protocol first, plain channel messages second
fn decode(data: &[u8]) -> String {
    if let Some((device, message)) = Message::parse(data) {
        return format!(" => dev {} cmd 0x{:02X}", device, message.command())
            .green()
            .to_string();
    }
    MidiMessage::parse(data)
        .map(|m| format!(" => {}", m))
        .unwrap_or_default()
}

/// Print every input and output port, for `--list-ports` style usage
pub fn list_ports_formatted() {
    println!("{}", "MIDI Input Ports:".bold());
    match crate::transport::list_input_ports() {
        Ok(ports) if !ports.is_empty() => {
            for (index, name) in ports.iter().enumerate() {
                println!("  [{}] {}", index, name);
            }
        }
        Ok(_) => println!("  {}", "(none)".dimmed()),
        Err(err) => println!("  {} {}", "error:".red(), err),
    }

    println!("{}", "MIDI Output Ports:".bold());
    match crate::transport::list_output_ports() {
        Ok(ports) if !ports.is_empty() => {
            for (index, name) in ports.iter().enumerate() {
                println!("  [{}] {}", index, name);
            }
        }
        Ok(_) => println!("  {}", "(none)".dimmed()),
        Err(err) => println!("  {} {}", "error:".red(), err),
    }
}
