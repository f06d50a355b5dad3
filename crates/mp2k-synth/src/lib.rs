//! Offline synthesis engine for ripping MP2K music to audio
//!
//! Renders the command stream produced by a sequence player into a stereo
//! float buffer. The engine is a batch mixer, not a live device: commands
//! carry absolute timestamps, and one `render` call mixes everything that
//! was scheduled.
//!
//! # Features
//! - Waveform presets of the hardware generator channels (square duties,
//!   15-bit and 7-stage LFSR noise)
//! - Resampling PCM voices with loop regions, fed by 4-bit wave-RAM and
//!   signed 8-bit codecs
//! - Per-voice ADSR envelopes with linear and exponential segments
//! - Per-channel gain/pan/pitch automation busses
//! - Shared decoded-sample store with serialized registration
//!
//! # Quick start
//! ```
//! use std::sync::Arc;
//! use mp2k_synth::{ChannelCtrl, Engine, SampleBank, SynthCommand};
//!
//! let bank = Arc::new(SampleBank::new());
//! let mut engine = Engine::new(32768, bank);
//! engine.ensure_channels(1);
//! engine
//!     .apply(0, SynthCommand::Channel { ctrl: ChannelCtrl::Gain, value: 0.8, time: 0.0 })
//!     .unwrap();
//! assert!(engine.render().is_empty());
//! ```

#![warn(missing_docs)]

pub mod command;
pub mod engine;
pub mod envelope;
pub mod oscillator;
pub mod pcm;
pub mod sampler;
pub mod util;

pub use command::{ChannelCtrl, NoteOn, SynthCommand, VoiceId, VoiceSource};
pub use engine::{Engine, DEFAULT_RENDER_RATE};
pub use envelope::{AdsrEnvelope, EnvelopeSpec};
pub use oscillator::{Oscillator, WavePreset};
pub use pcm::{decode_gb_wave, decode_pcm8, SampleBank, SampleData, SampleKey};
pub use sampler::Sampler;
pub use util::{middle_c_ratio, note_to_freq};

use thiserror::Error;

/// Errors surfaced by the engine when commands cannot be scheduled.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SynthError {
    /// A command addressed a channel the engine does not have.
    #[error("unknown channel {channel}")]
    UnknownChannel {
        /// Channel index carried by the command.
        channel: usize,
    },
    /// A note-start referenced a sample id never registered with the bank.
    #[error("no sample registered for key {key:?}")]
    UnknownSample {
        /// Offending composite sample key.
        key: SampleKey,
    },
}

/// Convenience alias for engine results.
pub type Result<T> = std::result::Result<T, SynthError>;
