//! Turn-taking controller
//!
//! Drives the listening loop and dispatches each recognized command as its own
//! task, so chat and speech latency never block the loop. Utterances heard
//! while a turn is in flight still reach the wake-word gate; the speaking flag
//! is what keeps the assistant from answering itself.
//!
//! A session runs from `start` to `stop` (or the error limit). Restarting the
//! listener to apply new speech timing keeps the session, so turns already in
//! flight still finish normally. While any turn is in flight the state is
//! `AwaitingReply`, or `Speaking` while a reply is actually being spoken.
//!
//! ```text
//!            start                 command
//!   Idle ───────────▶ Listening ───────────▶ AwaitingReply
//!    ▲                 ▲     ▲                │        │
//!    │ stop / 3 errors │     │ chat error     │ reply  │
//!    └─────────────────┘     └────────────────┘        ▼
//!                            ▲                      Speaking
//!                            └──────── spoken ────────┘
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::AssistantConfig;
use crate::conversation::{ChatService, ConversationSession, Message};
use crate::events::{Event, EventSender, Indicator, Speaker};
use crate::timing::{SharedTiming, TimingField};
use crate::voice::{
    AudioSink, GateDecision, SpeakingState, SpeechCoordinator, SpeechSynthesizer,
    TranscriptSource, Utterance, WakeWordGate,
};
use crate::{Error, Result};

/// Consecutive transcript errors tolerated before the session fails
pub const MAX_CONSECUTIVE_ERRORS: u32 = 3;

/// Wait after each transcript error
pub const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Default length of a test-listen recording
pub const DEFAULT_TEST_DURATION: Duration = Duration::from_secs(5);

/// Turn-taking state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Idle,
    Listening,
    AwaitingReply,
    Speaking,
}

/// Command from the presentation layer
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlCommand {
    Start,
    Stop,
    Toggle,
    /// Reset conversation history
    Clear,
    /// Set a timing field, in seconds
    Adjust(TimingField, f64),
    /// Record for a fixed duration and report the transcript
    TestListen(Duration),
}

type SharedSource = Arc<Mutex<Box<dyn TranscriptSource>>>;

/// State shared between the controller, its listening loop and turn tasks
struct Core {
    name: String,
    greeting_wake_word: String,
    gate: WakeWordGate,
    conversation: ConversationSession,
    speech: SpeechCoordinator,
    timing: Arc<SharedTiming>,
    events: EventSender,
    state: watch::Sender<TurnState>,
}

/// One run from `start` to `stop` (or the error limit)
#[derive(Default)]
struct Session {
    /// Cancelled when the session ends; turns check only this
    token: CancellationToken,
    /// Turns between command and return to listening
    turns: AtomicUsize,
    /// Turns currently holding the speaker
    voices: AtomicUsize,
}

struct Listener {
    session: Arc<Session>,
    /// Child of `session`; also cancelled to restart the loop
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Listener {
    fn is_active(&self) -> bool {
        !self.cancel.is_cancelled() && !self.handle.is_finished()
    }
}

/// Orchestrates the transcript source, wake-word gate, conversation and speech
pub struct TurnController {
    core: Arc<Core>,
    source: SharedSource,
    listener: Mutex<Option<Listener>>,
}

impl TurnController {
    /// Start building a controller
    #[must_use]
    pub fn builder() -> TurnControllerBuilder {
        TurnControllerBuilder::default()
    }

    /// Dispatch a presentation command
    ///
    /// # Errors
    ///
    /// Returns the underlying error for commands that fail; it has already been
    /// reported as an event
    pub async fn handle(&self, command: ControlCommand) -> Result<()> {
        tracing::debug!(?command, "control command");
        match command {
            ControlCommand::Start => self.start().await,
            ControlCommand::Stop => {
                self.stop().await;
                Ok(())
            }
            ControlCommand::Toggle => {
                if self.is_listening().await {
                    self.stop().await;
                    Ok(())
                } else {
                    self.start().await
                }
            }
            ControlCommand::Clear => {
                self.clear().await;
                Ok(())
            }
            ControlCommand::Adjust(field, seconds) => self.adjust(field, seconds).await,
            ControlCommand::TestListen(duration) => {
                self.test_listen(duration).await;
                Ok(())
            }
        }
    }

    /// Begin listening for the wake word
    ///
    /// # Errors
    ///
    /// Returns error if the transcript source fails to start
    pub async fn start(&self) -> Result<()> {
        if !self.launch().await? {
            return Ok(());
        }

        let events = &self.core.events;
        events.button("Stop Listening");
        events.chat(
            Speaker::System,
            format!(
                "Started listening for wake word. Say '{}' to activate.",
                self.core.greeting_wake_word
            ),
        );
        Ok(())
    }

    /// Stop listening; in-flight turns finish but their results are discarded
    pub async fn stop(&self) {
        if !self.halt().await {
            return;
        }

        let events = &self.core.events;
        events.button("Start Listening");
        events.indicator(Indicator::Standby);
        events.status("Stopped listening");
        events.chat(Speaker::System, "Stopped listening");
        events.transcription("");
    }

    /// Whether the listening loop is running
    pub async fn is_listening(&self) -> bool {
        self.listener
            .lock()
            .await
            .as_ref()
            .is_some_and(Listener::is_active)
    }

    /// Reset the conversation to the persona message
    pub async fn clear(&self) {
        self.core.conversation.reset().await;
        self.core.events.status("Conversation cleared");
        self.core
            .events
            .chat(Speaker::System, "Conversation history cleared.");
    }

    /// Update a timing field
    ///
    /// Speech-timing fields restart a running listener so the new value takes
    /// effect at once; the others are read fresh on every use.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for a non-positive value, or the restart error
    pub async fn adjust(&self, field: TimingField, seconds: f64) -> Result<()> {
        if let Err(e) = self.core.timing.set(field, seconds) {
            self.core.events.error(e.to_string());
            return Err(e);
        }
        self.core.events.status(format!("{field} set to {seconds:.1}s"));

        if field.requires_restart() && self.is_listening().await {
            tracing::info!(field = field.name(), seconds, "restarting listener");
            self.core.events.chat(
                Speaker::System,
                format!("{field} changed to {seconds:.1}s, restarting listening to apply it"),
            );
            self.restart().await?;
        }
        Ok(())
    }

    /// Record for `duration` and report what was heard
    ///
    /// Refused while listening, since both need the transcript source.
    pub async fn test_listen(&self, duration: Duration) {
        let listener = self.listener.lock().await;
        let events = &self.core.events;

        if listener.as_ref().is_some_and(Listener::is_active) {
            events.chat(Speaker::System, "Stop listening before running a speech test.");
            return;
        }

        events.status(format!(
            "Testing speech for {} seconds... Say anything!",
            duration.as_secs()
        ));
        events.indicator(Indicator::TestRecording);

        let result = {
            let mut source = self.source.lock().await;
            source.configure(self.core.timing.stt());
            match source.start().await {
                Ok(()) => {
                    let heard = source.record_for(duration).await;
                    if let Err(e) = source.stop().await {
                        tracing::warn!(error = %e, "failed to stop transcript source after test");
                    }
                    heard
                }
                Err(e) => Err(e),
            }
        };
        drop(listener);

        match result {
            Ok(text) if !text.trim().is_empty() => {
                events.chat(Speaker::Test, format!("Heard: '{}'", text.trim()));
            }
            Ok(_) => events.chat(Speaker::Test, "No speech detected in test"),
            Err(e) => events.error(format!("Test failed: {e}")),
        }
        events.status("Test complete.");
        events.indicator(Indicator::Standby);
    }

    /// Current turn state
    #[must_use]
    pub fn state(&self) -> TurnState {
        *self.core.state.borrow()
    }

    /// Watch turn-state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<TurnState> {
        self.core.state.subscribe()
    }

    /// Copy of the conversation history
    pub async fn history(&self) -> Vec<Message> {
        self.core.conversation.history().await
    }

    /// Shared timing handle
    #[must_use]
    pub fn timing(&self) -> &Arc<SharedTiming> {
        &self.core.timing
    }

    /// Speaking flag written by the speech coordinator
    #[must_use]
    pub fn speaking(&self) -> &Arc<SpeakingState> {
        self.core.speech.speaking()
    }

    /// Start the source and spawn the listening loop for a new session
    ///
    /// Returns `false` if already listening.
    async fn launch(&self) -> Result<bool> {
        let mut listener = self.listener.lock().await;
        if listener.as_ref().is_some_and(Listener::is_active) {
            tracing::debug!("already listening");
            return Ok(false);
        }
        if let Some(stale) = listener.take() {
            stale.session.token.cancel();
            if let Err(e) = stale.handle.await {
                tracing::warn!(error = %e, "previous listening loop panicked");
            }
        }

        self.start_source().await?;

        self.core.force_state(TurnState::Listening);
        self.core.announce_listening();
        *listener = Some(self.spawn_listener(Arc::new(Session::default())));

        tracing::info!(wake_words = ?self.core.gate.wake_words(), "listening for wake word");
        Ok(true)
    }

    /// Restart the loop and source within the current session
    ///
    /// The turn state is left alone, so a reply in flight is still shown and
    /// spoken.
    async fn restart(&self) -> Result<()> {
        let mut listener = self.listener.lock().await;
        let Some(current) = listener.take() else {
            return Ok(());
        };

        current.cancel.cancel();
        if let Err(e) = current.handle.await {
            tracing::warn!(error = %e, "listening loop panicked");
        }
        if let Err(e) = self.source.lock().await.stop().await {
            tracing::warn!(error = %e, "failed to stop transcript source");
        }

        if let Err(e) = self.start_source().await {
            current.session.token.cancel();
            self.core.force_state(TurnState::Idle);
            self.core.events.button("Start Listening");
            self.core.events.indicator(Indicator::Standby);
            return Err(e);
        }

        *listener = Some(self.spawn_listener(current.session));
        tracing::info!("listener restarted");
        Ok(())
    }

    /// Configure the source from current timing and start it
    async fn start_source(&self) -> Result<()> {
        let mut source = self.source.lock().await;
        source.configure(self.core.timing.stt());
        if let Err(e) = source.start().await {
            self.core
                .events
                .error(format!("Failed to start listening: {e}"));
            return Err(e);
        }
        Ok(())
    }

    fn spawn_listener(&self, session: Arc<Session>) -> Listener {
        let cancel = session.token.child_token();
        let handle = tokio::spawn(listen(
            Arc::clone(&self.core),
            Arc::clone(&self.source),
            Arc::clone(&session),
            cancel.clone(),
        ));
        Listener {
            session,
            cancel,
            handle,
        }
    }

    /// End the session: cancel the loop and stop the source
    ///
    /// Returns `false` if nothing was listening.
    async fn halt(&self) -> bool {
        let Some(listener) = self.listener.lock().await.take() else {
            return false;
        };
        let was_active = listener.is_active();

        listener.session.token.cancel();
        self.core.force_state(TurnState::Idle);

        if let Err(e) = listener.handle.await {
            tracing::warn!(error = %e, "listening loop panicked");
        }
        if let Err(e) = self.source.lock().await.stop().await {
            tracing::warn!(error = %e, "failed to stop transcript source");
        }

        tracing::info!("stopped listening");
        was_active
    }
}

impl Core {
    /// Derive the state from the in-flight turns, unless `session` has ended
    ///
    /// The check and the update happen under the watch lock, so once a session
    /// is cancelled none of its turns can move the state again. Returns whether
    /// the session is still live.
    fn refresh(&self, session: &Session) -> bool {
        let mut live = false;
        let mut next = TurnState::Listening;
        let changed = self.state.send_if_modified(|state| {
            live = !session.token.is_cancelled();
            if !live {
                return false;
            }
            next = if session.voices.load(Ordering::SeqCst) > 0 {
                TurnState::Speaking
            } else if session.turns.load(Ordering::SeqCst) > 0 {
                TurnState::AwaitingReply
            } else {
                TurnState::Listening
            };
            if *state == next {
                return false;
            }
            *state = next;
            true
        });
        if changed {
            tracing::debug!(state = ?next, "turn state");
            self.events.publish(Event::State(next));
            if next == TurnState::Listening {
                self.announce_listening();
            }
        }
        live
    }

    fn force_state(&self, next: TurnState) {
        if self.state.send_replace(next) != next {
            tracing::debug!(state = ?next, "turn state");
            self.events.publish(Event::State(next));
        }
    }

    fn announce_listening(&self) {
        self.events.indicator(Indicator::Listening);
        self.events.status(format!(
            "Listening for '{}'...",
            self.greeting_wake_word
        ));
        self.events.transcription("");
    }

    /// Route one utterance through the wake-word gate
    fn on_utterance(self: &Arc<Self>, utterance: &Utterance, session: &Arc<Session>) {
        let timing = self.timing.snapshot();
        let decision = self
            .gate
            .evaluate(utterance, self.speech.speaking(), &timing);

        match decision {
            GateDecision::Suppressed => {}
            GateDecision::NoMatch => {
                self.events.transcription(format!("Heard: {}", utterance.text));
            }
            GateDecision::AwaitingCommand { .. } => {
                self.events.transcription(format!("Heard: {}", utterance.text));
                self.events.chat(
                    Speaker::System,
                    "I heard the wake word. What can I help you with?",
                );
            }
            GateDecision::Command { wake_word, text } => {
                self.events.transcription(format!("Heard: {}", utterance.text));
                self.events.indicator(Indicator::Processing);
                self.events.status("Wake word detected! Processing command...");
                self.events.chat(
                    Speaker::System,
                    format!("Wake word '{wake_word}' detected!"),
                );
                self.events.chat(Speaker::You, text.clone());

                tokio::spawn(Arc::clone(self).run_turn(text, Arc::clone(session)));
            }
        }
    }

    /// One command: chat, then speak the reply
    async fn run_turn(self: Arc<Self>, command: String, session: Arc<Session>) {
        let turn = Uuid::new_v4();
        session.turns.fetch_add(1, Ordering::SeqCst);

        if self.refresh(&session) {
            tracing::info!(%turn, command = command.as_str(), "turn started");
            self.respond(turn, &command, &session).await;
        } else {
            tracing::debug!(%turn, "session stopped before turn began");
        }

        session.turns.fetch_sub(1, Ordering::SeqCst);
        self.refresh(&session);
        tracing::info!(%turn, "turn finished");
    }

    async fn respond(&self, turn: Uuid, command: &str, session: &Session) {
        self.events.status(format!("Getting {}'s response...", self.name));

        let reply = match self.conversation.submit(command).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(%turn, error = %e, "chat failed");
                self.events.error(format!("Failed to get response: {e}"));
                return;
            }
        };

        if session.token.is_cancelled() {
            tracing::info!(%turn, "session stopped, reply discarded");
            return;
        }
        self.events
            .chat(Speaker::Assistant(self.name.clone()), reply.clone());

        let spoken = self
            .speech
            .speak_with(&reply, || {
                session.voices.fetch_add(1, Ordering::SeqCst);
                self.refresh(session);
            })
            .await;
        session.voices.fetch_sub(1, Ordering::SeqCst);

        if let Err(e) = spoken {
            tracing::warn!(%turn, error = %e, "speaking failed");
            self.events.error(format!("TTS Error: {e}"));
        }
    }

    /// Give up after repeated transcript errors
    fn fail(&self, session: &Session, error: &Error) {
        tracing::error!(error = %error, "too many listening errors, stopping");
        session.token.cancel();
        self.force_state(TurnState::Idle);

        self.events.error(format!("Too many listening errors. Stopping. ({error})"));
        self.events.button("Start Listening");
        self.events.indicator(Indicator::Standby);
    }
}

/// The listening loop: one utterance at a time, in arrival order
async fn listen(
    core: Arc<Core>,
    source: SharedSource,
    session: Arc<Session>,
    cancel: CancellationToken,
) {
    let mut source = source.lock_owned().await;
    let mut consecutive_errors = 0;

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = source.next_utterance() => next,
        };

        match next {
            Ok(Some(text)) => {
                consecutive_errors = 0;
                core.on_utterance(&Utterance::new(text), &session);
            }
            Ok(None) => consecutive_errors = 0,
            Err(e) => {
                consecutive_errors += 1;
                tracing::warn!(error = %e, consecutive_errors, "transcript source error");

                if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    core.fail(&session, &e);
                    if let Err(e) = source.stop().await {
                        tracing::warn!(error = %e, "failed to stop transcript source");
                    }
                    break;
                }

                core.events.error(format!("Listening error: {e}"));
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(ERROR_BACKOFF) => {}
                }
            }
        }
    }

    tracing::debug!("listening loop exited");
}

/// Builder for [`TurnController`]
///
/// Every capability is required; `build` fails with `Error::Config` naming the
/// first one missing.
#[derive(Default)]
pub struct TurnControllerBuilder {
    source: Option<Box<dyn TranscriptSource>>,
    chat: Option<Box<dyn ChatService>>,
    synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    sink: Option<Arc<dyn AudioSink>>,
    events: Option<EventSender>,
    assistant: Option<AssistantConfig>,
    max_history_pairs: Option<usize>,
    timing: Option<Arc<SharedTiming>>,
}

impl TurnControllerBuilder {
    #[must_use]
    pub fn source(mut self, source: Box<dyn TranscriptSource>) -> Self {
        self.source = Some(source);
        self
    }

    #[must_use]
    pub fn chat(mut self, chat: Box<dyn ChatService>) -> Self {
        self.chat = Some(chat);
        self
    }

    #[must_use]
    pub fn synthesizer(mut self, synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn AudioSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    #[must_use]
    pub fn events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Name, wake words and persona prompt (defaults to Ada)
    #[must_use]
    pub fn assistant(mut self, assistant: AssistantConfig) -> Self {
        self.assistant = Some(assistant);
        self
    }

    #[must_use]
    pub const fn max_history_pairs(mut self, pairs: usize) -> Self {
        self.max_history_pairs = Some(pairs);
        self
    }

    /// Shared timing (defaults to `TimingConfig::default()`)
    #[must_use]
    pub fn timing(mut self, timing: Arc<SharedTiming>) -> Self {
        self.timing = Some(timing);
        self
    }

    /// Assemble the controller in the `Idle` state
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a capability is missing or no wake word is usable
    pub fn build(self) -> Result<TurnController> {
        let missing = |what: &str| Error::Config(format!("missing {what}"));

        let source = self.source.ok_or_else(|| missing("transcript source"))?;
        let chat = self.chat.ok_or_else(|| missing("chat service"))?;
        let synthesizer = self.synthesizer.ok_or_else(|| missing("speech synthesizer"))?;
        let sink = self.sink.ok_or_else(|| missing("audio sink"))?;
        let events = self.events.ok_or_else(|| missing("event sender"))?;

        let assistant = self.assistant.unwrap_or_default();
        let timing = self.timing.unwrap_or_default();
        let gate = WakeWordGate::new(assistant.wake_words)?;
        let greeting_wake_word = gate.wake_words()[0].clone();

        let speech = SpeechCoordinator::new(
            synthesizer,
            sink,
            Arc::new(SpeakingState::new()),
            Arc::clone(&timing),
            events.clone(),
        );
        let conversation = ConversationSession::new(
            chat,
            assistant.system_prompt,
            self.max_history_pairs.unwrap_or(15),
        );
        let (state, _) = watch::channel(TurnState::Idle);

        Ok(TurnController {
            core: Arc::new(Core {
                name: assistant.name,
                greeting_wake_word,
                gate,
                conversation,
                speech,
                timing,
                events,
                state,
            }),
            source: Arc::new(Mutex::new(source)),
            listener: Mutex::new(None),
        })
    }
}
