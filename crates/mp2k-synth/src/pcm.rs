//! Decoded PCM storage and the raw sample codecs.
//!
//! Samples arrive as raw cartridge bytes in one of two containers: signed
//! 8-bit PCM, or packed 4-bit wave RAM (two samples per byte, high nibble
//! first). Decoded data lands in a [`SampleBank`] keyed by a composite id so
//! every consumer shares one decoded copy.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

/// Composite identity of a decoded sample (instrument type joined with the
/// source address, so the same bytes decoded under two containers stay
/// distinct).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SampleKey(pub u64);

/// One decoded PCM sample.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleData {
    samples: Vec<f32>,
    /// Native playback rate in Hz.
    pub rate: f64,
    /// Loop region in frames, half-open; `None` plays one-shot.
    pub loop_range: Option<(u32, u32)>,
}

impl SampleData {
    /// Wrap decoded frames with their native rate and optional loop region.
    pub fn new(samples: Vec<f32>, rate: f64, loop_range: Option<(u32, u32)>) -> Self {
        SampleData {
            samples,
            rate,
            loop_range,
        }
    }

    /// Number of frames.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when the sample holds no frames.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Frame at `idx`, or silence past the end.
    #[inline]
    pub fn frame(&self, idx: usize) -> f32 {
        self.samples.get(idx).copied().unwrap_or(0.0)
    }
}

/// Decode signed 8-bit PCM into -1.0..1.0 floats.
pub fn decode_pcm8(raw: &[u8]) -> Vec<f32> {
    raw.iter().map(|&b| f32::from(b as i8) / 128.0).collect()
}

/// Decode packed 4-bit wave RAM, high nibble first, into -1.0..1.0 floats.
pub fn decode_gb_wave(raw: &[u8]) -> Vec<f32> {
    let mut out = Vec::with_capacity(raw.len() * 2);
    for &b in raw {
        out.push((f32::from(b >> 4) - 7.5) / 7.5);
        out.push((f32::from(b & 0x0F) - 7.5) / 7.5);
    }
    out
}

/// Shared store of decoded samples.
///
/// Registration is the only write path and is serialized by the lock; reads
/// are concurrent. An existing entry always wins, so re-registering a key is
/// a cheap no-op.
#[derive(Debug, Default)]
pub struct SampleBank {
    inner: RwLock<HashMap<SampleKey, Arc<SampleData>>>,
}

impl SampleBank {
    /// Create an empty bank.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a decoded sample.
    pub fn get(&self, key: SampleKey) -> Option<Arc<SampleData>> {
        self.inner.read().get(&key).cloned()
    }

    /// True when `key` already has a decoded entry.
    pub fn contains(&self, key: SampleKey) -> bool {
        self.inner.read().contains_key(&key)
    }

    /// Register a decoded sample, returning the stored entry.
    pub fn register(&self, key: SampleKey, data: SampleData) -> Arc<SampleData> {
        let mut map = self.inner.write();
        Arc::clone(map.entry(key).or_insert_with(|| Arc::new(data)))
    }

    /// Number of distinct decoded samples.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// True when nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
