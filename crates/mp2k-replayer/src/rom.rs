//! Bounds-checked access to a cartridge image.
//!
//! The console maps the cartridge at `0x0800_0000`, and every pointer stored
//! inside the image is an absolute address into that window. Nothing about a
//! ROM byte says whether it is a pointer, so all higher layers lean on one
//! validation gate before trusting a value:
//!
//! - the high bits must carry the cartridge tag (`0x08` bank),
//! - the masked offset must land past the cartridge header,
//! - the full access (`offset + size`) must fit inside the loaded image.
//!
//! Addresses that fail any check are reported as [`None`] from the internal
//! gates and surface as [`Mp2kError::OutOfBounds`] from the public readers.
//! Scanning code probes millions of candidate addresses, so the gates stay
//! allocation-free and branch-cheap.

use std::fs;
use std::path::Path;

use crate::error::{Mp2kError, Result};

/// Base address of the cartridge window in the console's address space.
pub const ROM_BASE: u32 = 0x0800_0000;

/// Offset of the first byte past the cartridge header. Pointers into the
/// header are never valid engine data.
pub const HEADER_SIZE: u32 = 0x200;

/// Mixer rate used for samples that ignore their stored header rate. This is
/// the engine's stock configuration; games that retune the mixer are rare.
pub const DEFAULT_SAMPLE_RATE: u32 = 13379;

/// High bits that must match [`ROM_BASE`] for a pointer to be in-window.
const REGION_MASK: u32 = 0xFE00_0000;

/// Mask extracting the in-image offset from a cartridge pointer.
const OFFSET_MASK: u32 = 0x07FF_FFFF;

/// A loaded cartridge image.
///
/// The image is immutable after loading. All reads are bounds-checked and
/// express positions as offsets from the start of the image; helpers accept
/// either a plain offset or a tagged absolute address and normalize
/// internally.
#[derive(Debug, Clone)]
pub struct RomImage {
    data: Vec<u8>,
    /// Playback rate assumed for fixed-rate sample instruments.
    pub sample_rate: u32,
}

impl RomImage {
    /// Wraps an in-memory image.
    pub fn new(data: Vec<u8>) -> Self {
        RomImage {
            data,
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }

    /// Reads an image from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(RomImage::new(fs::read(path)?))
    }

    /// Length of the image in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the image is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The raw image bytes.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Validates `addr` as a cartridge pointer to `size` readable bytes and
    /// returns the in-image offset. With `align` set, the pointer must also
    /// be word-aligned.
    pub(crate) fn map_addr(&self, addr: u32, size: u32, align: bool) -> Option<u32> {
        let mask = if align { REGION_MASK | 3 } else { REGION_MASK };
        if addr & mask != ROM_BASE {
            return None;
        }
        let offset = addr & OFFSET_MASK;
        if offset < HEADER_SIZE {
            return None;
        }
        if u64::from(offset) + u64::from(size) > self.data.len() as u64 {
            return None;
        }
        Some(offset)
    }

    /// Validates the pointer slot at `addr`, loads it, and validates that the
    /// loaded pointer covers `size` bytes. Returns the target's in-image
    /// offset. `align_slot` and `align_target` control the alignment checks
    /// on the slot and the loaded pointer respectively.
    pub(crate) fn map_deref(
        &self,
        addr: u32,
        size: u32,
        align_target: bool,
        align_slot: bool,
    ) -> Option<u32> {
        let slot = self.map_addr(addr | ROM_BASE, 4, align_slot)?;
        self.map_addr(self.raw_u32(slot), size, align_target)
    }

    /// Loads the little-endian word at a previously validated offset.
    #[inline]
    pub(crate) fn raw_u32(&self, offset: u32) -> u32 {
        let i = offset as usize;
        u32::from_le_bytes([
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ])
    }

    fn checked(&self, addr: u32, size: u32) -> Result<usize> {
        self.map_addr(addr | ROM_BASE, size, false)
            .map(|offset| offset as usize)
            .ok_or(Mp2kError::OutOfBounds { addr })
    }

    /// Reads the byte at `addr`. Accepts a plain offset or a tagged address.
    pub fn read_u8(&self, addr: u32) -> Result<u8> {
        let i = self.checked(addr, 1)?;
        Ok(self.data[i])
    }

    /// Reads the little-endian halfword at `addr`.
    pub fn read_u16(&self, addr: u32) -> Result<u16> {
        let i = self.checked(addr, 2)?;
        Ok(u16::from_le_bytes([self.data[i], self.data[i + 1]]))
    }

    /// Reads the little-endian word at `addr`.
    pub fn read_u32(&self, addr: u32) -> Result<u32> {
        let i = self.checked(addr, 4)?;
        Ok(u32::from_le_bytes([
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ]))
    }

    /// Reads the little-endian doubleword at `addr`.
    pub fn read_u64(&self, addr: u32) -> Result<u64> {
        let i = self.checked(addr, 8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.data[i..i + 8]);
        Ok(u64::from_le_bytes(bytes))
    }

    /// Reads the cartridge pointer stored at `addr` and returns its in-image
    /// offset. The slot itself may be unaligned; with `align` set, the loaded
    /// pointer must be word-aligned. Fails if either the slot or the loaded
    /// pointer is out of range.
    pub fn read_pointer(&self, addr: u32, align: bool) -> Result<u32> {
        self.map_deref(addr, 4, align, false)
            .ok_or(Mp2kError::OutOfBounds { addr })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_with(offset: usize, bytes: &[u8]) -> RomImage {
        let mut data = vec![0u8; offset + bytes.len()];
        data[offset..].copy_from_slice(bytes);
        RomImage::new(data)
    }

    #[test]
    fn test_reads_are_little_endian() {
        let rom = image_with(0x200, &[0x78, 0x56, 0x34, 0x12, 0xEF, 0xCD, 0xAB, 0x89]);

        assert_eq!(rom.read_u8(0x200).unwrap(), 0x78);
        assert_eq!(rom.read_u16(0x200).unwrap(), 0x5678);
        assert_eq!(rom.read_u32(0x200).unwrap(), 0x12345678);
        assert_eq!(rom.read_u64(0x200).unwrap(), 0x89ABCDEF_12345678);
    }

    #[test]
    fn test_offset_and_tagged_address_are_equivalent() {
        let rom = image_with(0x200, &[0xAA]);

        assert_eq!(rom.read_u8(0x200).unwrap(), 0xAA);
        assert_eq!(rom.read_u8(0x0800_0200).unwrap(), 0xAA);
    }

    #[test]
    fn test_wrong_region_tag_is_rejected() {
        let rom = image_with(0x200, &[0u8; 16]);

        assert!(rom.read_u8(0x0A00_0200).is_err(), "0x0A bank is not mapped");
        assert!(rom.read_u8(0x0200_0200).is_err(), "0x02 bank is not mapped");
    }

    #[test]
    fn test_upper_window_half_maps_past_16mb() {
        // The cartridge window spans 32 MB, so a 0x09 bank address is a
        // plain offset past 16 MB and fails only because the image is small.
        let rom = image_with(0x200, &[0u8; 16]);

        assert!(rom.read_u8(0x0900_0200).is_err());
    }

    #[test]
    fn test_header_addresses_are_rejected() {
        let rom = image_with(0x200, &[0u8; 16]);

        assert!(rom.read_u32(0x1FC).is_err());
        assert!(rom.read_u32(0x200).is_ok());
    }

    #[test]
    fn test_reads_past_the_end_are_rejected() {
        let rom = image_with(0x200, &[0u8; 4]);

        assert!(rom.read_u32(0x200).is_ok());
        assert!(rom.read_u32(0x201).is_err(), "tail word straddles the end");
        assert!(rom.read_u8(0x204).is_err());
    }

    #[test]
    fn test_read_pointer_follows_a_stored_address() {
        // Slot at 0x200 points at 0x208, which holds a recognizable word.
        let mut data = vec![0u8; 0x210];
        data[0x200..0x204].copy_from_slice(&0x0800_0208u32.to_le_bytes());
        data[0x208..0x20C].copy_from_slice(&0xDEADBEEFu32.to_le_bytes());
        let rom = RomImage::new(data);

        let target = rom.read_pointer(0x200, true).unwrap();
        assert_eq!(target, 0x208);
        assert_eq!(rom.read_u32(target).unwrap(), 0xDEADBEEF);
    }

    #[test]
    fn test_read_pointer_rejects_untagged_and_unaligned_targets() {
        let mut data = vec![0u8; 0x210];
        // Slot holds a plain offset with no cartridge tag.
        data[0x200..0x204].copy_from_slice(&0x0000_0208u32.to_le_bytes());
        // Slot holds a tagged but odd address.
        data[0x204..0x208].copy_from_slice(&0x0800_0209u32.to_le_bytes());
        let rom = RomImage::new(data);

        assert!(rom.read_pointer(0x200, true).is_err());
        assert!(rom.read_pointer(0x204, true).is_err());
        assert!(
            rom.read_pointer(0x204, false).is_ok(),
            "unaligned target is fine when alignment is not requested"
        );
    }

    #[test]
    fn test_read_pointer_slot_may_be_unaligned() {
        let mut data = vec![0u8; 0x210];
        data[0x201..0x205].copy_from_slice(&0x0800_0208u32.to_le_bytes());
        let rom = RomImage::new(data);

        assert_eq!(rom.read_pointer(0x201, true).unwrap(), 0x208);
    }
}
