//! Synthesis command vocabulary exchanged between a sequencer and the engine.
//!
//! A sequence player translates decoded music data into these commands; the
//! engine schedules and mixes them. Commands carry absolute timestamps in
//! seconds, so producers can run ahead of the renderer freely.

use crate::envelope::EnvelopeSpec;
use crate::oscillator::WavePreset;
use crate::pcm::SampleKey;

/// Opaque per-voice identity minted by the command producer.
///
/// The producer guarantees uniqueness across every channel it feeds into one
/// engine; the engine never invents ids of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceId(pub u64);

/// Sound source selection for a note-start command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VoiceSource {
    /// Resampled playback of a registered PCM sample.
    Sample {
        /// Composite id the sample was registered under.
        key: SampleKey,
        /// Pitch ratio relative to the sample's native rate.
        ratio: f64,
    },
    /// A fixed waveform preset at an absolute frequency.
    Wave {
        /// Waveform preset to generate.
        preset: WavePreset,
        /// Base frequency in Hz.
        freq: f64,
    },
}

/// Channel-level control target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelCtrl {
    /// Channel amplitude multiplier.
    Gain,
    /// Stereo position, 0.0 (left) to 1.0 (right).
    Pan,
    /// Pitch ratio applied to every voice on the channel.
    PitchBend,
}

/// Note-start command body.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteOn {
    /// Identity the producer will use for later kill commands.
    pub voice: VoiceId,
    /// Start time in seconds.
    pub start: f64,
    /// Sounding time before the release segment begins; `None` sounds until
    /// killed.
    pub duration: Option<f64>,
    /// Waveform or sample source.
    pub source: VoiceSource,
    /// Voice amplitude, usually velocity-derived.
    pub gain: f64,
    /// Forced stereo position overriding the channel pan, 0.0..1.0.
    pub pan: Option<f64>,
    /// Amplitude envelope riding the voice.
    pub envelope: EnvelopeSpec,
}

/// One timed instruction for the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SynthCommand {
    /// Start a voice.
    NoteOn(NoteOn),
    /// Stop a voice: immediately, or by entering its release segment.
    Kill {
        /// Voice to stop.
        voice: VoiceId,
        /// When the stop takes effect, in seconds.
        time: f64,
        /// Hard cut instead of a release.
        immediate: bool,
    },
    /// Adjust a channel bus control.
    Channel {
        /// Control target.
        ctrl: ChannelCtrl,
        /// New value; breakpoints hold until the next one.
        value: f64,
        /// When the change takes effect, in seconds.
        time: f64,
    },
}

impl SynthCommand {
    /// Timestamp the command takes effect at.
    pub fn time(&self) -> f64 {
        match self {
            SynthCommand::NoteOn(note) => note.start,
            SynthCommand::Kill { time, .. } => *time,
            SynthCommand::Channel { time, .. } => *time,
        }
    }
}
