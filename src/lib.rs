//! Ada - wake-word driven voice chat assistant
//!
//! This library provides the core of the assistant:
//! - Voice processing (capture, segmentation, STT, TTS, playback)
//! - Wake word gating with self-feedback suppression
//! - Bounded conversation history over an OpenAI-compatible chat API
//! - The turn-taking controller and its presentation events
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │               Presentation (console)                │
//! │      commands ▼                      ▲ events       │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │               Turn-Taking Controller                │
//! │  Transcript Source → Wake Word Gate → Conversation  │
//! │        ▲ suppression          Speech Coordinator ◀──┘
//! └────────┴────────────────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │      Whisper/Deepgram  │  Chat API  │  ElevenLabs   │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod console;
pub mod controller;
pub mod conversation;
pub mod error;
pub mod events;
pub mod timing;
pub mod voice;

pub use config::Config;
pub use controller::{ControlCommand, TurnController, TurnControllerBuilder, TurnState};
pub use conversation::{
    ChatCompletions, ChatService, ConversationHistory, ConversationSession, Message, Role,
};
pub use error::{Error, Result};
pub use events::{ChatEntry, Event, EventReceiver, EventSender, Indicator, Speaker};
pub use timing::{SharedTiming, SttTiming, TimingConfig, TimingField};
