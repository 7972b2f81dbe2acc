//! Terminal presentation layer
//!
//! Reads commands from stdin and prints controller events, either as readable
//! lines or as JSON (one event per line).

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::controller::{ControlCommand, DEFAULT_TEST_DURATION, TurnController};
use crate::conversation::Role;
use crate::events::{Event, EventReceiver};
use crate::timing::{TimingConfig, TimingField};
use crate::{Error, Result};

const HELP: &str = "\
Commands:
  start                 start listening for the wake word
  stop                  stop listening
  toggle                start or stop listening
  clear                 reset the conversation
  set <field> <secs>    change a timing value (see 'timing')
  test [secs]           record and transcribe once (default 5s)
  timing                show timing values
  history               show the conversation history
  help                  show this help
  quit                  stop and exit";

/// A parsed console line
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConsoleCommand {
    Control(ControlCommand),
    Timing,
    History,
    Help,
    Quit,
}

/// Console behavior switches
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleOptions {
    /// Print events as JSON lines
    pub json: bool,
    /// Start listening immediately
    pub autostart: bool,
}

/// Parse one line of input
///
/// Returns `None` for a blank line.
///
/// # Errors
///
/// Returns `Error::Config` for unknown commands or malformed arguments
pub fn parse_command(line: &str) -> Result<Option<ConsoleCommand>> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    let command = match (head.to_lowercase().as_str(), args.as_slice()) {
        ("start", []) => ConsoleCommand::Control(ControlCommand::Start),
        ("stop", []) => ConsoleCommand::Control(ControlCommand::Stop),
        ("toggle", []) => ConsoleCommand::Control(ControlCommand::Toggle),
        ("clear" | "reset", []) => ConsoleCommand::Control(ControlCommand::Clear),
        ("set", [field, seconds]) => {
            let field: TimingField = field.parse()?;
            let seconds: f64 = seconds
                .parse()
                .map_err(|_| Error::Config(format!("not a number of seconds: {seconds}")))?;
            ConsoleCommand::Control(ControlCommand::Adjust(field, seconds))
        }
        ("test", []) => ConsoleCommand::Control(ControlCommand::TestListen(DEFAULT_TEST_DURATION)),
        ("test", [seconds]) => {
            let seconds: u64 = seconds
                .parse()
                .ok()
                .filter(|s| *s > 0)
                .ok_or_else(|| Error::Config(format!("not a whole number of seconds: {seconds}")))?;
            ConsoleCommand::Control(ControlCommand::TestListen(Duration::from_secs(seconds)))
        }
        ("timing", []) => ConsoleCommand::Timing,
        ("history", []) => ConsoleCommand::History,
        ("help" | "?", []) => ConsoleCommand::Help,
        ("quit" | "exit" | "q", []) => ConsoleCommand::Quit,
        ("set", _) => return Err(Error::Config("usage: set <field> <secs>".to_string())),
        (other, _) => {
            return Err(Error::Config(format!(
                "unknown command: {other} (try 'help')"
            )));
        }
    };

    Ok(Some(command))
}

/// Render an event for the terminal
///
/// Returns `None` for events with nothing to show in text mode.
#[must_use]
pub fn render(event: &Event, json: bool) -> Option<String> {
    if json {
        return match serde_json::to_string(event) {
            Ok(line) => Some(line),
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize event");
                None
            }
        };
    }

    match event {
        Event::Status(text) => Some(format!("-- {text}")),
        Event::Chat(entry) => Some(format!(
            "[{}] {}: {}",
            entry.timestamp.format("%H:%M:%S"),
            entry.speaker.label(),
            entry.message
        )),
        Event::Indicator(indicator) => Some(format!("   ({})", indicator.label())),
        Event::Transcription(text) if !text.is_empty() => Some(format!("   {text}")),
        Event::SpeakingOverrun { elapsed_secs } => Some(format!(
            "   (still speaking after {elapsed_secs:.1}s)"
        )),
        Event::Transcription(_) | Event::Button(_) | Event::State(_) => None,
    }
}

/// Format timing values, one per line
#[must_use]
pub fn format_timing(timing: &TimingConfig) -> String {
    TimingField::ALL
        .iter()
        .map(|field| {
            let restart = if field.requires_restart() {
                " (restarts listening)"
            } else {
                ""
            };
            format!("  {:<28}{:.2}s{restart}", field.name(), timing.get(*field))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Run the console until `quit`, end of input or Ctrl-C
///
/// Controller commands run on their own task in submission order, so events
/// keep printing while a command (e.g. a test recording) is in progress.
///
/// # Errors
///
/// Returns error if stdin cannot be read
pub async fn run(
    controller: Arc<TurnController>,
    mut events: EventReceiver,
    options: ConsoleOptions,
) -> Result<()> {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let worker = tokio::spawn(run_commands(Arc::clone(&controller), command_rx));

    if options.autostart {
        let _ = command_tx.send(ControlCommand::Start);
    }
    if !options.json {
        println!("{HELP}");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                if let Some(line) = render(&event, options.json) {
                    println!("{line}");
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    tracing::debug!("stdin closed");
                    break;
                };
                match parse_command(&line) {
                    Ok(Some(ConsoleCommand::Control(command))) => {
                        let _ = command_tx.send(command);
                    }
                    Ok(Some(ConsoleCommand::Timing)) => {
                        println!("{}", format_timing(&controller.timing().snapshot()));
                    }
                    Ok(Some(ConsoleCommand::History)) => {
                        for message in controller.history().await {
                            let role = match message.role {
                                Role::System => "system",
                                Role::User => "user",
                                Role::Assistant => "assistant",
                            };
                            println!("  {role:>9}: {}", message.content);
                        }
                    }
                    Ok(Some(ConsoleCommand::Help)) => println!("{HELP}"),
                    Ok(Some(ConsoleCommand::Quit)) => break,
                    Ok(None) => {}
                    Err(e) => println!("{e}"),
                }
            }
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "failed to listen for ctrl-c");
                }
                tracing::info!("interrupted");
                break;
            }
        }
    }

    drop(command_tx);
    if let Err(e) = worker.await {
        tracing::warn!(error = %e, "command task panicked");
    }
    controller.stop().await;

    while let Ok(event) = events.try_recv() {
        if let Some(line) = render(&event, options.json) {
            println!("{line}");
        }
    }
    Ok(())
}

async fn run_commands(
    controller: Arc<TurnController>,
    mut commands: mpsc::UnboundedReceiver<ControlCommand>,
) {
    while let Some(command) = commands.recv().await {
        if let Err(e) = controller.handle(command).await {
            tracing::debug!(error = %e, ?command, "command failed");
        }
    }
}
