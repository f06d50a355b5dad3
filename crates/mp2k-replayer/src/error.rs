//! Error taxonomy of the replayer.
//!
//! Address failures are recoverable at every call site; instrument failures
//! degrade a single bank slot; decode failures poison one track. Candidate
//! rejection during heuristic scanning is a boolean, never an error.

use thiserror::Error;

/// Failures surfaced while loading, scanning, decoding or rendering a ROM.
#[derive(Error, Debug)]
pub enum Mp2kError {
    /// Reading the ROM image from disk failed.
    #[error("failed to read ROM image: {0}")]
    Io(#[from] std::io::Error),

    /// An address failed the tag/alignment/bounds gate.
    #[error("address 0x{addr:08X} is outside the mapped ROM region")]
    OutOfBounds {
        /// Offending address or pointer value.
        addr: u32,
    },

    /// An instrument definition failed structural validation.
    #[error("malformed instrument at 0x{addr:08X}: {reason}")]
    MalformedInstrument {
        /// Address of the instrument record.
        addr: u32,
        /// What the validator tripped over.
        reason: String,
    },

    /// Track bytecode could not be decoded.
    #[error("track decode failed at 0x{addr:08X}: {reason}")]
    Decode {
        /// Address of the offending instruction.
        addr: u32,
        /// What the decoder tripped over.
        reason: String,
    },

    /// A song index past the end of a song table.
    #[error("song index {index} is past the end of the table")]
    SongIndex {
        /// Requested table index.
        index: usize,
    },

    /// The synthesis engine rejected a scheduled command.
    #[error("synthesis engine rejected a command: {0}")]
    Synth(#[from] mp2k_synth::SynthError),

    /// Writing the rendered waveform failed.
    #[cfg(feature = "export-wav")]
    #[error("WAV export failed: {0}")]
    Export(String),
}

/// Convenience alias for replayer results.
pub type Result<T> = std::result::Result<T, Mp2kError>;
