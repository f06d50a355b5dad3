//! Heuristic discovery of songs and song tables inside a ROM image.
//!
//! Games ship no index of their music, so the scanner walks the whole image
//! looking for byte patterns that hold together like engine data:
//!
//! - a song header is a track count, an instrument bank pointer, and one
//!   pointer per track, all of which must dereference cleanly,
//! - a song table is a run of consecutive 8-byte slots whose first word
//!   points at such a header.
//!
//! Validation comes in two depths. The shallow check only proves the header
//! shape and is cheap enough to run on every word of the image. The deep
//! check follows the instrument bank and the first byte of every track and
//! weeds out pointer runs that merely look like headers.

use crate::error::{Mp2kError, Result};
use crate::rom::{RomImage, HEADER_SIZE};

/// First byte values a track may not start with. `0xB1` ends a track, so a
/// track that opens with it is empty; the rest are commands the engine does
/// not place first.
const BAD_LEAD_COMMANDS: std::ops::RangeInclusive<u8> = 0xC8..=0xCC;

/// A contiguous run of song pointers found in the image.
///
/// `table_start..table_end` covers the run in 8-byte slots. `songs` holds
/// the distinct song header offsets that passed deep validation; a scan
/// without a table (see [`RomImage::find_all_songs`]) leaves the bounds at
/// zero and fills only `songs`.
#[derive(Debug, Clone, Default)]
pub struct SongTable {
    /// Offset of the first table slot.
    pub table_start: u32,
    /// Offset one past the last table slot.
    pub table_end: u32,
    /// Offsets of the validated song headers, in discovery order.
    pub songs: Vec<u32>,
}

impl SongTable {
    /// Number of 8-byte slots between the table bounds.
    #[inline]
    pub fn entry_count(&self) -> usize {
        ((self.table_end - self.table_start) / 8) as usize
    }

    /// Offset of the table slot holding entry `index`.
    #[inline]
    pub fn entry_addr(&self, index: usize) -> u32 {
        self.table_start + 8 * index as u32
    }

    /// Follows the pointer in table slot `index` and returns the song header
    /// offset it names. Slots past the end of the run are an error, as are
    /// slots whose pointer no longer dereferences.
    pub fn song_from_table(&self, rom: &RomImage, index: usize) -> Result<u32> {
        let slot = self.table_start as u64 + 8 * index as u64;
        if slot >= u64::from(self.table_end) {
            return Err(Mp2kError::SongIndex { index });
        }
        rom.read_pointer(slot as u32, true)
    }
}

impl RomImage {
    /// Tests whether `addr` looks like a song header.
    ///
    /// The shallow form (`deep == false`) verifies shape only: the track
    /// count, the header extent, and that every pointer slot carries the
    /// cartridge tag and dereferences. The deep form additionally vets the
    /// first instrument of the bank and the first command byte of every
    /// track. A zero track count is a valid shallow header (games keep such
    /// placeholder entries in their tables) but never a valid deep one.
    pub fn check_song(&self, addr: u32, deep: bool) -> bool {
        self.check_song_inner(addr, deep).is_some()
    }

    fn check_song_inner(&self, addr: u32, deep: bool) -> Option<()> {
        let bytes = self.bytes();
        let track_count = *bytes.get(addr as usize)?;
        if track_count == 0 {
            return if deep { None } else { Some(()) };
        }
        let end = u64::from(addr) + 8 + u64::from(track_count) * 4;
        if end >= bytes.len() as u64 {
            return None;
        }

        let mut slot = addr + 4;
        while u64::from(slot) < end {
            if bytes[slot as usize + 3] & 0xFE != 0x08 {
                return None;
            }
            let data = self.map_deref(slot, 12, false, true)?;
            if deep {
                if slot == addr + 4 {
                    self.check_lead_instrument(data)?;
                } else {
                    let cmd = bytes[data as usize];
                    if cmd == 0xB1 || cmd < 0x80 || BAD_LEAD_COMMANDS.contains(&cmd) {
                        return None;
                    }
                }
            }
            slot += 4;
        }
        Some(())
    }

    /// Vets the first entry of a candidate instrument bank. `data` has been
    /// validated for 12 readable bytes.
    fn check_lead_instrument(&self, data: u32) -> Option<()> {
        let bytes = self.bytes();
        let d = data as usize;
        if bytes[d + 2] != 0 {
            return None;
        }
        let kind = bytes[d];
        if kind > 12 && kind != 16 && kind != 32 && kind != 64 && kind != 128 {
            return None;
        }
        let word = self.raw_u32(data + 4);
        let mode = kind & 0x7;
        if mode != 0 {
            // Programmable-sound instrument: the word is a duty cycle or a
            // noise width, and the envelope bytes have hardware ranges.
            if mode == 4 {
                if word > 1 {
                    return None;
                }
            } else if mode != 3 && word > 3 {
                return None;
            }
            if bytes[d + 8] > 7 || bytes[d + 9] > 7 || bytes[d + 10] > 15 || bytes[d + 11] > 7 {
                return None;
            }
        }
        if matches!(kind, 0 | 3 | 8 | 11 | 16 | 32) {
            // The word is a pointer to sample or wavetable data.
            let payload = self.map_addr(word, 16, true)?;
            if mode == 0 {
                let p = payload as usize;
                if bytes[p] != 0 || bytes[p + 1] != 0 || bytes[p + 2] != 0 {
                    return None;
                }
                if bytes[p + 3] & !0x40 != 0 {
                    return None;
                }
            }
        } else if kind == 64 || kind == 128 {
            if bytes[d + 1] != 0 || bytes[d + 2] != 0 || bytes[d + 3] != 0 {
                return None;
            }
            self.map_addr(word, 16, true)?;
            if kind == 64 {
                self.map_deref(data + 8, 128, true, true)?;
            } else if self.raw_u32(data + 8) != 0 {
                return None;
            }
        }
        Some(())
    }

    /// Scans forward from `offset` for the largest run of song pointers.
    ///
    /// Every word of the image is probed as a table slot; consecutive hits
    /// (at the table's 8-byte stride) form a run, and the run with the most
    /// deep-validated songs wins. Songs are collected per run, and duplicate
    /// pointers within a run count once. With `min_songs` set, the scan
    /// returns the first committed run holding strictly more than that many
    /// songs instead of searching the rest of the image.
    pub fn find_song_table(&self, min_songs: Option<usize>, mut offset: u32) -> SongTable {
        let mut result = SongTable::default();
        if self.len() < 8 {
            return result;
        }
        let size = (self.len() - 8) as u32;
        let mut table_start = 0u32;
        let mut songs: Vec<u32> = Vec::new();

        while offset < size {
            let candidate = self
                .map_deref(offset, 12, true, true)
                .filter(|&addr| self.check_song(addr, false));
            match candidate {
                None => {
                    if table_start != 0 {
                        if songs.len() > result.songs.len() {
                            result.table_start = table_start;
                            result.table_end = offset;
                            result.songs = std::mem::take(&mut songs);
                            if min_songs.is_some_and(|min| result.songs.len() > min) {
                                return result;
                            }
                        }
                        songs.clear();
                    }
                    table_start = 0;
                    offset += 4;
                }
                Some(addr) => {
                    if table_start == 0 {
                        table_start = offset;
                    }
                    if !songs.contains(&addr) && self.check_song(addr, true) {
                        songs.push(addr);
                    }
                    offset += 8;
                }
            }
        }

        if songs.len() > result.songs.len() {
            result.table_start = table_start;
            result.table_end = offset;
            result.songs = songs;
        }
        result
    }

    /// Collects every song table in the image, scanning each one from where
    /// the previous one ended.
    pub fn find_song_tables(&self) -> Vec<SongTable> {
        let mut tables = Vec::new();
        let mut offset = HEADER_SIZE;
        while (offset as usize) < self.len().saturating_sub(8) {
            let table = self.find_song_table(Some(0), offset);
            if table.songs.is_empty() {
                break;
            }
            offset = table.table_end;
            tables.push(table);
        }
        tables
    }

    /// Scans the whole image for song headers directly, without requiring a
    /// table around them. Useful for games that build their song lists in
    /// code. The result has no table bounds, only songs.
    pub fn find_all_songs(&self) -> SongTable {
        let mut result = SongTable::default();
        let size = self.len().saturating_sub(12) as u32;
        let mut offset = HEADER_SIZE;
        while offset < size {
            if self.check_song(offset, true) {
                result.songs.push(offset);
                // A header is at least 8 bytes; skip its pointer area.
                offset += 4;
            }
            offset += 4;
        }
        result
    }
}
