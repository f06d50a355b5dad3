//! Song assembly: header, instrument bank, decoded tracks.
//!
//! A song header is a track count byte, three reserved bytes, a pointer to
//! the instrument bank, and one pointer per track. Loading decodes every
//! track up front; a track whose bytecode does not decode is dropped from
//! playback and reported alongside the survivors rather than failing the
//! whole song.

use std::sync::Arc;

use mp2k_synth::pcm::SampleBank;

use crate::error::{Mp2kError, Result};
use crate::instrument::{InstrumentBank, InstrumentId};
use crate::rom::RomImage;
use crate::track::TrackData;

/// One fully loaded song.
#[derive(Debug)]
pub struct SongData {
    /// Offset of the song header.
    pub addr: u32,
    /// Track count claimed by the header.
    pub track_count: u8,
    /// True when any decoded track jumps backward.
    pub has_loop: bool,
    bank: InstrumentBank,
    samples: Arc<SampleBank>,
    tracks: Vec<TrackData>,
    failures: Vec<(usize, Mp2kError)>,
}

impl SongData {
    /// Loads the song at `addr`: instrument bank first, then every track the
    /// header points at.
    pub fn load(rom: &RomImage, addr: u32) -> Result<SongData> {
        let track_count = rom.read_u8(addr)?;
        let bank_addr = rom.read_pointer(addr + 4, true)?;
        let samples = Arc::new(SampleBank::new());
        let bank = InstrumentBank::load(rom, &samples, bank_addr);

        let mut tracks = Vec::new();
        let mut failures = Vec::new();
        let mut has_loop = false;
        for i in 0..u32::from(track_count) {
            // Track pointers are not required to be word aligned.
            let decoded = rom
                .read_pointer(addr + 8 + 4 * i, false)
                .and_then(|track_addr| TrackData::decode(rom, track_addr));
            match decoded {
                Ok(track) => {
                    has_loop |= track.has_loop;
                    tracks.push(track);
                }
                Err(err) => failures.push((i as usize, err)),
            }
        }

        Ok(SongData {
            addr,
            track_count,
            has_loop,
            bank,
            samples,
            tracks,
            failures,
        })
    }

    /// Decoded tracks, in header order with failed slots removed.
    pub fn tracks(&self) -> &[TrackData] {
        &self.tracks
    }

    /// Track slots that failed to decode, as `(header index, error)`.
    pub fn failures(&self) -> &[(usize, Mp2kError)] {
        &self.failures
    }

    /// The song's instrument bank.
    pub fn bank(&self) -> &InstrumentBank {
        &self.bank
    }

    /// Shared store of PCM decoded for this song's instruments.
    pub fn samples(&self) -> &Arc<SampleBank> {
        &self.samples
    }

    /// The instrument every track starts on before any instrument-select
    /// command: the first loaded bank slot.
    pub fn default_instrument(&self) -> Option<InstrumentId> {
        self.bank.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put_ptr(data: &mut [u8], at: usize, target: u32) {
        data[at..at + 4].copy_from_slice(&(target | 0x0800_0000).to_le_bytes());
    }

    fn put_square(data: &mut [u8], at: usize) {
        data[at] = 2;
        data[at + 4] = 1;
        data[at + 8] = 7;
        data[at + 9] = 30;
        data[at + 10] = 15;
        data[at + 11] = 30;
    }

    /// Two-track song at 0x400: bank at 0x500, tracks at 0x600 and 0x620.
    fn build_rom() -> RomImage {
        let mut data = vec![0u8; 0x800];
        data[0x400] = 2;
        put_ptr(&mut data, 0x404, 0x500);
        put_ptr(&mut data, 0x408, 0x600);
        put_ptr(&mut data, 0x40C, 0x620);
        put_square(&mut data, 0x500);
        // Track 0: tempo, a rest, fine.
        data[0x600..0x603].copy_from_slice(&[0xBB, 75, 0x98]);
        data[0x603] = 0xB1;
        // Track 1: one note then a loop back over a rest.
        data[0x620..0x624].copy_from_slice(&[0xD0, 60, 100, 0x98]);
        data[0x624] = 0xB2;
        put_ptr(&mut data, 0x625, 0x623);
        RomImage::new(data)
    }

    #[test]
    fn test_load_assembles_bank_and_tracks() {
        let rom = build_rom();
        let song = SongData::load(&rom, 0x400).unwrap();
        assert_eq!(song.track_count, 2);
        assert_eq!(song.tracks().len(), 2);
        assert!(song.failures().is_empty());
        assert!(song.has_loop, "track 1 jumps backward");
        assert!(song.default_instrument().is_some());
        assert_eq!(song.bank().addr, 0x500);
    }

    #[test]
    fn test_bad_track_pointer_poisons_only_that_track() {
        let rom = {
            let mut data = vec![0u8; 0x800];
            data[0x400] = 2;
            put_ptr(&mut data, 0x404, 0x500);
            put_ptr(&mut data, 0x408, 0x600);
            // Second track pointer targets unmapped space.
            data[0x40C..0x410].copy_from_slice(&0x0200_0000u32.to_le_bytes());
            put_square(&mut data, 0x500);
            data[0x600] = 0xB1;
            RomImage::new(data)
        };
        let song = SongData::load(&rom, 0x400).unwrap();
        assert_eq!(song.tracks().len(), 1);
        assert_eq!(song.failures().len(), 1);
        assert_eq!(song.failures()[0].0, 1, "header slot index is reported");
    }

    #[test]
    fn test_undecodable_track_is_reported() {
        let rom = {
            let mut data = vec![0u8; 0x800];
            data[0x400] = 1;
            put_ptr(&mut data, 0x404, 0x500);
            put_ptr(&mut data, 0x408, 0x600);
            put_square(&mut data, 0x500);
            // 0xB7 is not a valid command.
            data[0x600] = 0xB7;
            RomImage::new(data)
        };
        let song = SongData::load(&rom, 0x400).unwrap();
        assert!(song.tracks().is_empty());
        assert!(matches!(
            song.failures()[0].1,
            Mp2kError::Decode { addr: 0x600, .. }
        ));
    }

    #[test]
    fn test_zero_track_song_loads_empty() {
        let rom = {
            let mut data = vec![0u8; 0x800];
            put_ptr(&mut data, 0x404, 0x500);
            put_square(&mut data, 0x500);
            RomImage::new(data)
        };
        let song = SongData::load(&rom, 0x400).unwrap();
        assert_eq!(song.track_count, 0);
        assert!(song.tracks().is_empty());
        assert!(!song.has_loop);
    }
}
