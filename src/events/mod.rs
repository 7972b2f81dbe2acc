//! Presentation events published by the assistant core
//!
//! The core pushes events into an unbounded channel and never waits for the
//! presentation layer. Publishing is best-effort: a closed channel is logged and
//! never propagates to callers.

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::controller::TurnState;

/// Who a chat-log line is attributed to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum Speaker {
    /// Assistant housekeeping messages
    System,
    /// The person talking to the assistant
    You,
    /// The assistant, by its configured name
    Assistant(String),
    /// Any reported failure
    Error,
    /// Test-listen results
    Test,
}

impl Speaker {
    /// Display label
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::System => "System",
            Self::You => "You",
            Self::Assistant(name) => name,
            Self::Error => "Error",
            Self::Test => "Test",
        }
    }
}

/// Listening indicator shown next to the status line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Indicator {
    Standby,
    Listening,
    Processing,
    Speaking,
    TestRecording,
}

impl Indicator {
    /// Display label
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Standby => "Standby",
            Self::Listening => "Listening...",
            Self::Processing => "Processing command...",
            Self::Speaking => "Speaking (mic muted)",
            Self::TestRecording => "Test recording...",
        }
    }
}

/// One line of the chat log
#[derive(Debug, Clone, Serialize)]
pub struct ChatEntry {
    pub speaker: Speaker,
    pub message: String,
    pub timestamp: DateTime<Local>,
}

/// An event for the presentation layer
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Event {
    /// Status line text
    Status(String),
    /// Chat-log append
    Chat(ChatEntry),
    /// Listening indicator change
    Indicator(Indicator),
    /// Transcription preview (empty string clears it)
    Transcription(String),
    /// Start/stop button label
    Button(String),
    /// Turn-taking state change
    State(TurnState),
    /// Playback ran past `speaking_timeout`
    SpeakingOverrun { elapsed_secs: f64 },
}

/// Receiving half, drained by the presentation layer
pub type EventReceiver = mpsc::UnboundedReceiver<Event>;

/// Sending half, cloned into every component that reports
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<Event>,
}

/// Create a connected event sender/receiver pair
#[must_use]
pub fn channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, rx)
}

impl EventSender {
    /// Publish an event
    pub fn publish(&self, event: Event) {
        if self.tx.send(event).is_err() {
            tracing::trace!("event receiver dropped, event discarded");
        }
    }

    /// Update the status line
    pub fn status(&self, text: impl Into<String>) {
        self.publish(Event::Status(text.into()));
    }

    /// Append a chat-log line stamped with the local time
    pub fn chat(&self, speaker: Speaker, message: impl Into<String>) {
        self.publish(Event::Chat(ChatEntry {
            speaker,
            message: message.into(),
            timestamp: Local::now(),
        }));
    }

    /// Report an error as a chat line plus a status update
    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        self.status(format!("Error: {message}"));
        self.chat(Speaker::Error, message);
    }

    /// Update the listening indicator
    pub fn indicator(&self, indicator: Indicator) {
        self.publish(Event::Indicator(indicator));
    }

    /// Update the transcription preview
    pub fn transcription(&self, text: impl Into<String>) {
        self.publish(Event::Transcription(text.into()));
    }

    /// Update the start/stop button label
    pub fn button(&self, label: impl Into<String>) {
        self.publish(Event::Button(label.into()));
    }
}
