//! MP2K (Sappy) Song Extractor and Replayer
//!
//! This crate locates and plays back music stored in Game Boy Advance ROMs
//! by the MP2K sound driver. It scans a raw ROM image for song tables,
//! decodes track bytecode into events, loads the instrument banks the songs
//! reference, and replays everything into timestamped synthesis commands
//! for [`mp2k_synth`].
//!
//! # Features
//!
//! - Bounds-checked ROM image access with GBA pointer translation
//! - Heuristic song and song-table discovery in headerless images
//! - Track bytecode decoding into a flat, loop-aware event list
//! - Instrument banks with PCM, PSG, key-split and percussion voices,
//!   deduplicated across songs
//! - Per-track playback with tempo sharing and PSG channel exclusivity
//! - Optional whole-song WAV export
//!
//! # Example
//!
//! ```no_run
//! use mp2k_replayer::{RomImage, SongData, SongPlayer};
//!
//! # fn main() -> mp2k_replayer::Result<()> {
//! let rom = RomImage::load("game.gba")?;
//! let table = rom.find_song_table(None, 0);
//! println!(
//!     "song table at 0x{:08X} with {} entries",
//!     table.table_start,
//!     table.entry_count()
//! );
//!
//! let song = SongData::load(&rom, table.song_from_table(&rom, 0)?)?;
//! let commands = SongPlayer::new(&song).run();
//! println!("{} synthesis commands", commands.len());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

// Core modules
pub mod error;
pub mod instrument;
pub mod player;
pub mod rom;
pub mod scanner;
pub mod song;
pub mod track;

// Re-export commonly used types
pub use error::{Mp2kError, Result};
pub use instrument::{Adsr, InstrumentBank, InstrumentId, InstrumentKind, MpInstrument, NoteSpec};
pub use player::SongPlayer;
pub use rom::{RomImage, DEFAULT_SAMPLE_RATE, HEADER_SIZE, ROM_BASE};
pub use scanner::SongTable;
pub use song::SongData;
pub use track::{Mp2kEvent, TrackData};

// Synthesis backend types that show up in this crate's public API
pub use mp2k_synth::{SynthCommand, DEFAULT_RENDER_RATE};

// Export module - WAV rendering (optional)
#[cfg(feature = "export-wav")]
pub mod export;

#[cfg(feature = "export-wav")]
pub use export::{export_to_wav, render_song};
