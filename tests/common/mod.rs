//! Shared test utilities: scripted stand-ins for every controller capability

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ada_voice::config::AssistantConfig;
use ada_voice::timing::SttTiming;
use ada_voice::voice::{AudioSink, SpeechSynthesizer, TranscriptSource};
use ada_voice::{
    ChatService, Error, Event, EventReceiver, Message, Result, Speaker, TurnController,
    TurnState, events,
};
use async_trait::async_trait;
use tokio::sync::{Notify, mpsc, watch};

/// Upper bound for any single wait in these tests
const WAIT: Duration = Duration::from_secs(120);

/// What the controller did to the transcript source
#[derive(Default)]
pub struct SourceLog {
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    /// Calls to `next_utterance`; a call after an item means that item was handled
    pub calls: AtomicUsize,
    pub configured: Mutex<Vec<SttTiming>>,
}

/// Transcript source fed through a channel; pends forever when nothing is queued
pub struct FakeSource {
    rx: mpsc::UnboundedReceiver<Result<Option<String>>>,
    log: Arc<SourceLog>,
    test_transcript: String,
}

/// Test-side handle for a [`FakeSource`]
pub struct SourceHandle {
    tx: mpsc::UnboundedSender<Result<Option<String>>>,
    pub log: Arc<SourceLog>,
}

impl SourceHandle {
    pub fn say(&self, text: &str) {
        self.tx.send(Ok(Some(text.to_string()))).unwrap();
    }

    pub fn fail(&self) {
        self.tx
            .send(Err(Error::Transcript("recognizer crashed".to_string())))
            .unwrap();
    }

    pub fn starts(&self) -> usize {
        self.log.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.log.stops.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.log.calls.load(Ordering::SeqCst)
    }

    pub fn last_config(&self) -> Option<SttTiming> {
        self.log.configured.lock().unwrap().last().copied()
    }
}

pub fn source(test_transcript: &str) -> (FakeSource, SourceHandle) {
    let (tx, rx) = mpsc::unbounded_channel();
    let log = Arc::new(SourceLog::default());
    (
        FakeSource {
            rx,
            log: Arc::clone(&log),
            test_transcript: test_transcript.to_string(),
        },
        SourceHandle { tx, log },
    )
}

#[async_trait]
impl TranscriptSource for FakeSource {
    fn configure(&mut self, timing: SttTiming) {
        self.log.configured.lock().unwrap().push(timing);
    }

    async fn start(&mut self) -> Result<()> {
        self.log.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.log.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn next_utterance(&mut self) -> Result<Option<String>> {
        self.log.calls.fetch_add(1, Ordering::SeqCst);
        match self.rx.recv().await {
            Some(item) => item,
            None => std::future::pending().await,
        }
    }

    async fn record_for(&mut self, duration: Duration) -> Result<String> {
        tokio::time::sleep(duration).await;
        Ok(self.test_transcript.clone())
    }
}

#[derive(Default)]
struct ChatInner {
    replies: Mutex<VecDeque<Result<String>>>,
    requests: Mutex<Vec<Vec<Message>>>,
    completed: AtomicUsize,
    hold: AtomicBool,
    release: Notify,
}

/// Chat service answering from a queue (default reply "ok")
#[derive(Clone, Default)]
pub struct FakeChat {
    inner: Arc<ChatInner>,
}

impl FakeChat {
    pub fn replying(replies: Vec<Result<String>>) -> Self {
        let chat = Self::default();
        chat.inner.replies.lock().unwrap().extend(replies);
        chat
    }

    /// Make every request wait for [`FakeChat::release`]
    pub fn hold(&self) {
        self.inner.hold.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.inner.release.notify_one();
    }

    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.inner.requests.lock().unwrap().clone()
    }

    pub fn completed(&self) -> usize {
        self.inner.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatService for FakeChat {
    async fn complete(&self, messages: &[Message]) -> Result<String> {
        self.inner.requests.lock().unwrap().push(messages.to_vec());
        if self.inner.hold.load(Ordering::SeqCst) {
            self.inner.release.notified().await;
        }
        let reply = self
            .inner
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("ok".to_string()));
        self.inner.completed.fetch_add(1, Ordering::SeqCst);
        reply
    }
}

/// Synthesizer that records what it was asked to say
#[derive(Clone, Default)]
pub struct FakeSynth {
    pub texts: Arc<Mutex<Vec<String>>>,
    pub fail: bool,
}

impl FakeSynth {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSynth {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        self.texts.lock().unwrap().push(text.to_string());
        if self.fail {
            Err(Error::Synthesis("ElevenLabs TTS error 401".to_string()))
        } else {
            Ok(b"ID3 fake mp3".to_vec())
        }
    }
}

/// Audio sink that counts plays and notes the turn state at each one
#[derive(Clone, Default)]
pub struct FakeSink {
    pub plays: Arc<AtomicUsize>,
    pub fail: bool,
    observer: Arc<Mutex<Option<watch::Receiver<TurnState>>>>,
    states: Arc<Mutex<Vec<TurnState>>>,
}

impl FakeSink {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn plays(&self) -> usize {
        self.plays.load(Ordering::SeqCst)
    }

    pub fn observe(&self, states: watch::Receiver<TurnState>) {
        *self.observer.lock().unwrap() = Some(states);
    }

    /// Turn state seen at the start of each play
    pub fn states_while_playing(&self) -> Vec<TurnState> {
        self.states.lock().unwrap().clone()
    }
}

impl AudioSink for FakeSink {
    fn play_mp3(&self, _mp3_data: &[u8]) -> Result<()> {
        if let Some(states) = self.observer.lock().unwrap().as_ref() {
            self.states.lock().unwrap().push(*states.borrow());
        }
        self.plays.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(Error::Playback("no output device".to_string()))
        } else {
            Ok(())
        }
    }
}

/// A controller wired to fakes, plus handles to inspect them
pub struct Harness {
    pub controller: TurnController,
    pub events: EventReceiver,
    pub source: SourceHandle,
    pub chat: FakeChat,
    pub synth: FakeSynth,
    pub sink: FakeSink,
}

pub fn harness() -> Harness {
    harness_with(FakeChat::default(), FakeSynth::default(), FakeSink::default())
}

pub fn harness_with(chat: FakeChat, synth: FakeSynth, sink: FakeSink) -> Harness {
    let (fake_source, source) = source("testing one two");
    let (event_tx, events) = events::channel();

    let controller = TurnController::builder()
        .source(Box::new(fake_source))
        .chat(Box::new(chat.clone()))
        .synthesizer(Arc::new(synth.clone()))
        .sink(Arc::new(sink.clone()))
        .events(event_tx)
        .assistant(AssistantConfig {
            system_prompt: "You are Ada.".to_string(),
            ..AssistantConfig::default()
        })
        .max_history_pairs(3)
        .build()
        .unwrap();
    sink.observe(controller.subscribe());

    Harness {
        controller,
        events,
        source,
        chat,
        synth,
        sink,
    }
}

impl Harness {
    /// Start listening and consume every event queued so far
    pub async fn start(&mut self) -> Vec<Event> {
        self.controller.start().await.unwrap();
        let seen = drain(&mut self.events);
        assert!(
            seen.iter()
                .any(|e| matches!(e, Event::State(TurnState::Listening))),
            "start did not announce listening: {seen:#?}"
        );
        seen
    }

    /// Wait until the listening loop has handled everything queued so far
    pub async fn settle(&self, handled: usize) {
        wait_until(|| self.source.calls() > handled).await;
    }
}

/// Read events until the given state changes have been seen, in order
///
/// Panics on an unexpected state change. Returns every event read.
pub async fn expect_states(events: &mut EventReceiver, expected: &[TurnState]) -> Vec<Event> {
    let mut seen = Vec::new();
    let mut remaining = expected.iter();
    let mut want = remaining.next();

    while let Some(next) = want {
        let event = tokio::time::timeout(WAIT, events.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {next:?}; saw {seen:#?}"))
            .expect("event channel closed");

        if let Event::State(state) = &event {
            assert_eq!(state, next, "unexpected state change; saw {seen:#?}");
            want = remaining.next();
        }
        seen.push(event);
    }
    seen
}

/// Read events until one matches
pub async fn expect_event(
    events: &mut EventReceiver,
    matches: impl Fn(&Event) -> bool,
) -> Vec<Event> {
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(WAIT, events.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for event; saw {seen:#?}"))
            .expect("event channel closed");
        let done = matches(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

/// Everything currently queued
pub fn drain(events: &mut EventReceiver) -> Vec<Event> {
    std::iter::from_fn(|| events.try_recv().ok()).collect()
}

/// Chat-log lines among `events`
pub fn chat_lines(events: &[Event]) -> Vec<(Speaker, String)> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::Chat(entry) => Some((entry.speaker.clone(), entry.message.clone())),
            _ => None,
        })
        .collect()
}

/// Poll `condition`, letting the runtime (and paused clock) move between checks
pub async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never became true");
}
