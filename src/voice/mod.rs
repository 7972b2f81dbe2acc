//! Voice processing module
//!
//! Handles audio capture, utterance segmentation, transcription, the wake word
//! gate, speech synthesis and playback.

mod capture;
mod playback;
mod segmenter;
mod speaking;
mod stt;
mod synthesis;
mod transcriber;
mod tts;
mod wake_word;

pub use capture::{AudioCapture, SAMPLE_RATE, rms, samples_to_wav};
pub use playback::{AudioPlayback, AudioSink, DecodedAudio, decode_mp3, resample};
pub use segmenter::{DEFAULT_ENERGY_THRESHOLD, SegmentState, UtteranceSegmenter};
pub use speaking::SpeakingState;
pub use stt::SpeechToText;
pub use synthesis::SpeechCoordinator;
pub use transcriber::{MicTranscriber, TranscriptSource};
pub use tts::{SpeechSynthesizer, TextToSpeech, VoiceSettings};
pub use wake_word::{GateDecision, Utterance, WakeWordGate};
