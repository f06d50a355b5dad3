//! Instrument bank loading and note synthesis setup.
//!
//! An instrument bank is an array of 12-byte records. The first byte is a
//! type tag selecting one of three families:
//!
//! - sample instruments play PCM data referenced by a pointer in the record
//!   (8-bit with a rate/loop header, or 4-bit fixed-rate wavetables),
//! - generator instruments drive one of the console's programmable sound
//!   channels (two duty-cycle squares, the wavetable channel, noise),
//! - split instruments fan out to 128 sub-instruments selected by key,
//!   either directly (percussion) or through a remap table.
//!
//! Alternate type codes (base + 8) behave identically to their base type and
//! are normalized on load. Loading never fails a whole bank: a record that
//! does not validate simply leaves its slot empty.
//!
//! Every parsed record lands in the bank's registry and is referred to by
//! [`InstrumentId`] from then on; bank slots, split sub-slots, and track
//! players all hold ids. Structurally identical records at different
//! addresses collapse to a single registry entry. Decoded PCM is cached in a
//! [`SampleBank`] keyed by (type, address) so banks that reference the same
//! waveform share one decode.

use mp2k_synth::command::VoiceSource;
use mp2k_synth::envelope::EnvelopeSpec;
use mp2k_synth::oscillator::WavePreset;
use mp2k_synth::pcm::{decode_gb_wave, decode_pcm8, SampleBank, SampleData, SampleKey};
use mp2k_synth::util::middle_c_ratio;

use crate::error::{Mp2kError, Result};
use crate::rom::RomImage;

/// Slot filler left in ROMs where an instrument pointer was never assigned.
const FILLER_ADDR: u32 = 0x8080_8080;

/// Byte stride of one bank record.
const RECORD_SIZE: u32 = 12;

/// Mixer level of the programmable sound channels relative to PCM voices.
const PSG_LEVEL: f64 = 0.3;

/// Sample rate of the wavetable channel's 32-step waveforms.
const GB_WAVE_RATE: f64 = 4186.0;

/// Curve fit mapping an envelope decay ratio to an exponential rate,
/// `ln(x) * COEF - ADJ`.
const LOG_COEF: f64 = 64.9707;
const LOG_ADJ: f64 = 1.4875;

/// Handle to an instrument in its bank's registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstrumentId(usize);

/// Canonical instrument families after alternate-code normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstrumentKind {
    /// PCM sample, playback rate from its header.
    Sample,
    /// PCM sample ignoring the header rate, played at the ROM default.
    FixedSample,
    /// 32-step wavetable on the console's third sound channel.
    GbWave,
    /// Square wave channel one (the one with a sweep unit).
    Square1,
    /// Square wave channel two.
    Square2,
    /// Noise channel.
    Noise,
    /// 128 sub-instruments through a key remap table.
    KeySplit,
    /// 128 sub-instruments indexed directly by key.
    Percussion,
}

impl InstrumentKind {
    /// Maps a raw type byte to its canonical family.
    pub fn from_code(code: u8) -> Option<InstrumentKind> {
        match code {
            0 => Some(InstrumentKind::Sample),
            8 => Some(InstrumentKind::FixedSample),
            3 | 11 => Some(InstrumentKind::GbWave),
            1 | 9 => Some(InstrumentKind::Square1),
            2 | 10 => Some(InstrumentKind::Square2),
            4 | 12 => Some(InstrumentKind::Noise),
            0x40 => Some(InstrumentKind::KeySplit),
            0x80 => Some(InstrumentKind::Percussion),
            _ => None,
        }
    }

    /// The canonical type byte for this family.
    pub fn code(self) -> u8 {
        match self {
            InstrumentKind::Sample => 0,
            InstrumentKind::Square1 => 1,
            InstrumentKind::Square2 => 2,
            InstrumentKind::GbWave => 3,
            InstrumentKind::Noise => 4,
            InstrumentKind::FixedSample => 8,
            InstrumentKind::KeySplit => 0x40,
            InstrumentKind::Percussion => 0x80,
        }
    }

    /// Hardware channel number for families bound to an exclusive console
    /// channel. Only one voice per such channel may sound at a time, song
    /// wide, regardless of which track plays it.
    pub fn generator_code(self) -> Option<u8> {
        match self {
            InstrumentKind::Square1 => Some(1),
            InstrumentKind::Square2 => Some(2),
            InstrumentKind::GbWave => Some(3),
            InstrumentKind::Noise => Some(4),
            _ => None,
        }
    }

    /// Whether the family uses the exponential sample envelope encoding.
    fn exp_envelope(self) -> bool {
        matches!(self, InstrumentKind::Sample | InstrumentKind::FixedSample)
    }
}

/// Envelope values as stored, converted to unit ranges.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Adsr {
    /// Attack amount; interpretation differs per family.
    pub attack: f64,
    /// Decay ratio (sample families) or decay seconds (generator families).
    pub decay: f64,
    /// Sustain level, 0 to 1.
    pub sustain: f64,
    /// Release ratio or seconds, like decay.
    pub release: f64,
}

/// Family-specific payload of a loaded instrument.
#[derive(Debug, Clone, PartialEq)]
pub enum InstrumentPayload {
    /// Shared PCM identified by its cache key.
    Sample {
        /// Cache key in the song's [`SampleBank`].
        key: SampleKey,
    },
    /// Programmable channel configuration.
    Generator {
        /// Duty cycle (squares) or width selector (noise).
        mode: u8,
        /// Raw sweep register byte, square channel one only.
        sweep: u8,
    },
    /// Per-key sub-instruments in the same registry.
    Split {
        /// One slot per key number.
        slots: Vec<Option<InstrumentId>>,
    },
}

/// One loaded instrument record.
#[derive(Debug, Clone)]
pub struct MpInstrument {
    /// Offset of the record in the image.
    pub addr: u32,
    /// Raw type byte as stored, before normalization.
    pub code: u8,
    /// Canonical family.
    pub kind: InstrumentKind,
    /// Converted envelope values.
    pub adsr: Adsr,
    /// Gate time in seconds; zero means ungated.
    pub gate: f64,
    /// Stored pan position, 0 left to 128 right, 64 center.
    pub pan: u8,
    /// Whether `pan` overrides the channel pan when played through a split.
    pub force_pan: bool,
    /// Family payload.
    pub payload: InstrumentPayload,
}

/// Everything a note-on needs besides its scheduling identity.
#[derive(Debug, Clone)]
pub struct NoteSpec {
    /// Sound source for the synthesis engine.
    pub source: VoiceSource,
    /// Voice gain before channel volume.
    pub gain: f64,
    /// Forced pan position in 0..=1, if the instrument demands one.
    pub pan: Option<f64>,
    /// Possibly gate-clamped duration in seconds; `None` holds until
    /// released.
    pub duration: Option<f64>,
    /// Envelope for the voice.
    pub envelope: EnvelopeSpec,
}

impl MpInstrument {
    fn read_adsr(rom: &RomImage, addr: u32, kind: InstrumentKind) -> Result<(Adsr, f64)> {
        let a = f64::from(rom.read_u8(addr + 8)?);
        let d = f64::from(rom.read_u8(addr + 9)?);
        let s = f64::from(rom.read_u8(addr + 10)?);
        let r = f64::from(rom.read_u8(addr + 11)?);
        if kind.exp_envelope() {
            let adsr = Adsr {
                attack: (255.0 - a) / 60.0,
                decay: d / 256.0,
                sustain: s / 255.0,
                release: r / 256.0,
            };
            Ok((adsr, 0.0))
        } else {
            let a = f64::from(rom.read_u8(addr + 8)? & 0x7);
            let adsr = Adsr {
                attack: a / 7.0,
                decay: d / 60.0,
                sustain: s / 15.0,
                release: r / 60.0,
            };
            let gate = f64::from(rom.read_u8(addr + 2)?) / 255.0;
            Ok((adsr, gate))
        }
    }

    fn load_sample(
        rom: &RomImage,
        samples: &SampleBank,
        addr: u32,
        code: u8,
        kind: InstrumentKind,
    ) -> Result<MpInstrument> {
        let sample_addr = rom.read_pointer(addr + 4, true)?;
        let key = SampleKey((u64::from(kind.code()) << 32) | u64::from(sample_addr));
        let mut pan = 0u8;
        let mut force_pan = false;

        if kind == InstrumentKind::GbWave {
            if !samples.contains(key) {
                let start = sample_addr as usize;
                let raw = rom
                    .bytes()
                    .get(start..start + 16)
                    .ok_or(Mp2kError::OutOfBounds { addr: sample_addr })?;
                samples.register(
                    key,
                    SampleData::new(decode_gb_wave(raw), GB_WAVE_RATE, Some((0, 32))),
                );
            }
        } else {
            pan = rom.read_u8(addr + 3)? ^ 0x80;
            force_pan = pan & 0x80 == 0;
            if pan == 127 {
                // Full right is stored as 127; widen it so center stays 64.
                pan = 128;
            }
            if !samples.contains(key) {
                let loop_flag = rom.read_u16(sample_addr + 2)?;
                let scaled_rate = rom.read_u32(sample_addr + 4)?;
                let loop_start = rom.read_u32(sample_addr + 8)?;
                let len = rom.read_u32(sample_addr + 12)?;
                let start = u64::from(sample_addr) + 16;
                if start + u64::from(len) > rom.len() as u64 {
                    return Err(Mp2kError::OutOfBounds { addr: sample_addr });
                }
                let rate = if kind == InstrumentKind::Sample {
                    f64::from(scaled_rate) / 1024.0
                } else {
                    f64::from(rom.sample_rate)
                };
                let loop_range = if loop_flag != 0 && loop_start < len {
                    Some((loop_start, len))
                } else {
                    None
                };
                let raw = &rom.bytes()[start as usize..(start + u64::from(len)) as usize];
                samples.register(key, SampleData::new(decode_pcm8(raw), rate, loop_range));
            }
        }

        let (adsr, gate) = Self::read_adsr(rom, addr, kind)?;
        Ok(MpInstrument {
            addr,
            code,
            kind,
            adsr,
            gate,
            pan,
            force_pan,
            payload: InstrumentPayload::Sample { key },
        })
    }

    fn load_generator(
        rom: &RomImage,
        addr: u32,
        code: u8,
        kind: InstrumentKind,
    ) -> Result<MpInstrument> {
        let sweep = if kind == InstrumentKind::Square1 {
            rom.read_u8(addr + 3)?
        } else {
            0
        };
        let mode = rom.read_u8(addr + 4)?;
        let reserved = rom.read_u8(addr + 5)? | rom.read_u8(addr + 6)? | rom.read_u8(addr + 7)?;
        let limit = if kind == InstrumentKind::Noise { 1 } else { 3 };
        if reserved != 0 || mode > limit {
            return Err(Mp2kError::MalformedInstrument {
                addr,
                reason: format!("generator mode {mode} out of range"),
            });
        }
        let (adsr, gate) = Self::read_adsr(rom, addr, kind)?;
        Ok(MpInstrument {
            addr,
            code,
            kind,
            adsr,
            gate,
            pan: 0,
            force_pan: false,
            payload: InstrumentPayload::Generator { mode, sweep },
        })
    }

    /// Builds the synthesis setup for one note, or `None` if this instrument
    /// cannot play `key`. Splits resolve their sub-instrument through
    /// `bank`. `tuning` is a fractional semitone offset added to the pitch
    /// of sample and generator voices.
    pub fn make_note(
        &self,
        bank: &InstrumentBank,
        key: u8,
        tuning: f64,
        velocity: u8,
        duration: Option<f64>,
    ) -> Option<NoteSpec> {
        match &self.payload {
            InstrumentPayload::Sample { key: sample_key } => {
                if key & 0x80 != 0 {
                    return None;
                }
                let ratio = if self.kind == InstrumentKind::FixedSample {
                    1.0
                } else {
                    middle_c_ratio(f64::from(key) + tuning)
                };
                Some(NoteSpec {
                    source: VoiceSource::Sample { key: *sample_key, ratio },
                    gain: f64::from(velocity) / 127.0,
                    pan: None,
                    duration,
                    envelope: self.envelope_spec(1.0),
                })
            }
            InstrumentPayload::Generator { mode, .. } => {
                let preset = match self.kind {
                    InstrumentKind::Noise => {
                        if mode & 1 != 0 {
                            WavePreset::Noise7
                        } else {
                            WavePreset::Noise15
                        }
                    }
                    _ => match mode {
                        0 => WavePreset::Square125,
                        1 => WavePreset::Square25,
                        3 => WavePreset::Square75,
                        _ => WavePreset::Square50,
                    },
                };
                let duration = match duration {
                    Some(len) if self.gate > 0.0 && len > self.gate => Some(self.gate),
                    other => other,
                };
                let gain = f64::from(velocity) / 127.0 * PSG_LEVEL;
                Some(NoteSpec {
                    source: VoiceSource::Wave {
                        preset,
                        freq: mp2k_synth::util::note_to_freq(f64::from(key) + tuning),
                    },
                    gain,
                    pan: None,
                    duration,
                    envelope: self.envelope_spec(gain),
                })
            }
            InstrumentPayload::Split { slots } => {
                let id = (*slots.get(usize::from(key))?)?;
                let sub = bank.instrument(id);
                let mut spec = sub.make_note(bank, key, tuning, velocity, duration)?;
                if sub.force_pan && sub.pan != 64 {
                    spec.pan = Some(f64::from(sub.pan) / 128.0);
                }
                Some(spec)
            }
        }
    }

    /// Converts the stored envelope into engine terms. `factor` scales the
    /// attack, decay, and release windows; generator voices pass their own
    /// level so quieter notes run their stepped envelopes faster.
    pub fn envelope_spec(&self, factor: f64) -> EnvelopeSpec {
        let exp = self.kind.exp_envelope();
        let (start_gain, attack) = if self.adsr.attack != 0.0 {
            (1.0 - (60.0 * self.adsr.attack) / 255.0, self.adsr.attack * factor)
        } else {
            (1.0, 0.0)
        };
        let mut decay = self.adsr.decay * factor;
        let mut release = self.adsr.release * factor;
        if exp {
            decay = if decay != 0.0 { decay.ln() * LOG_COEF - LOG_ADJ } else { 0.0 };
            release = if release != 0.0 { release.ln() * LOG_COEF - LOG_ADJ } else { 0.0 };
        }
        EnvelopeSpec {
            start_gain,
            attack,
            decay,
            sustain: self.adsr.sustain,
            release,
            exp_decay: exp,
        }
    }

    /// Short human-readable name for dumps.
    pub fn display_name(&self) -> String {
        let alt = if self.code != self.kind.code() { " (Alt)" } else { "" };
        match &self.payload {
            InstrumentPayload::Sample { key } => {
                let family = if self.kind == InstrumentKind::GbWave {
                    "Waveform"
                } else {
                    "Sample"
                };
                format!("{family}{alt} (0x{:X})", key.0 & 0xFFFF_FFFF)
            }
            InstrumentPayload::Generator { mode, .. } => match self.kind {
                InstrumentKind::Noise => format!("Noise{alt} (type {mode})"),
                _ => {
                    let channel = if self.kind == InstrumentKind::Square1 { 1 } else { 2 };
                    let duty = ["12.5%", "25%", "50%", "75%"][usize::from(*mode & 3)];
                    format!("Square {channel}{alt} ({duty})")
                }
            },
            InstrumentPayload::Split { .. } => {
                let family = if self.kind == InstrumentKind::KeySplit {
                    "Split"
                } else {
                    "Percussion"
                };
                format!("{family} (0x{:X})", self.addr)
            }
        }
    }

    /// Multi-line description of the record for dumps. Splits list their
    /// occupied keys, resolved through `bank`.
    pub fn describe(&self, bank: &InstrumentBank, rom: &RomImage) -> String {
        let mut out = format!("{}:\n  base address: 0x{:X}\n", self.display_name(), self.addr);
        if let InstrumentPayload::Split { slots } = &self.payload {
            for (key, slot) in slots.iter().enumerate() {
                if let Some(id) = slot {
                    out.push_str(&format!("  {key}: {}\n", bank.instrument(*id).display_name()));
                }
            }
            return out;
        }
        let byte = |offset| rom.read_u8(self.addr + offset).unwrap_or(0);
        out.push_str(&format!("  base key: {}\n", byte(1)));
        match &self.payload {
            InstrumentPayload::Generator { sweep, .. } => {
                out.push_str(&format!("  gate: {}\n", byte(2)));
                if self.kind == InstrumentKind::Square1 {
                    out.push_str(&format!("  sweep: 0x{sweep:02X}\n"));
                }
            }
            _ if self.kind == InstrumentKind::GbWave => {
                out.push_str(&format!("  gate: {}\n", byte(2)));
            }
            _ => {
                let forced = if self.force_pan { " (forced)" } else { "" };
                out.push_str(&format!("  pan: {}{forced}\n", self.pan));
            }
        }
        out.push_str(&format!(
            "  A={} ({:.4})  D={} ({:.4})  S={} ({:.4})  R={} ({:.4})\n",
            byte(8),
            self.adsr.attack,
            byte(9),
            self.adsr.decay,
            byte(10),
            self.adsr.sustain,
            byte(11),
            self.adsr.release
        ));
        out
    }
}

impl PartialEq for MpInstrument {
    /// Structural equality for deduplication: raw type code, envelope, gate,
    /// and payload. Address and pan are not compared. The raw code keeps an
    /// alternate-coded record distinct from its base-coded twin, so dumps
    /// label each as written. Split payloads compare their sub-instrument
    /// ids, which are interned first, so two split tables match exactly when
    /// their occupied keys resolve identically.
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code
            && self.adsr == other.adsr
            && self.gate == other.gate
            && self.payload == other.payload
    }
}

/// The 128-slot instrument bank of one song.
///
/// All instruments a song can reach live in the bank's registry, including
/// the sub-instruments of splits; everything else holds [`InstrumentId`]s
/// into it.
#[derive(Debug, Clone)]
pub struct InstrumentBank {
    /// Offset of the first record.
    pub addr: u32,
    registry: Vec<MpInstrument>,
    slots: Vec<Option<InstrumentId>>,
}

impl InstrumentBank {
    /// Loads up to 128 records starting at `addr`. Records that fail to load
    /// leave empty slots; records structurally equal to an earlier one alias
    /// its registry entry.
    pub fn load(rom: &RomImage, samples: &SampleBank, addr: u32) -> Self {
        let mut bank = InstrumentBank {
            addr,
            registry: Vec::new(),
            slots: Vec::with_capacity(128),
        };
        for id in 0..128u32 {
            let record_addr = addr + RECORD_SIZE * id;
            let slot = if (record_addr as usize) < rom.len() {
                bank.intern(rom, samples, record_addr, false)
            } else {
                None
            };
            bank.slots.push(slot);
        }
        bank
    }

    /// Parses the record at `addr` into the registry.
    ///
    /// Returns `None` for empty or unusable records: filler addresses, the
    /// well-known unused-instrument pattern, unknown type bytes, records
    /// whose pointers do not validate, and nested splits when `in_split` is
    /// set.
    fn intern(
        &mut self,
        rom: &RomImage,
        samples: &SampleBank,
        addr: u32,
        in_split: bool,
    ) -> Option<InstrumentId> {
        if addr == FILLER_ADDR {
            return None;
        }
        let code = rom.read_u8(addr).ok()?;
        if code == 1
            && rom.read_u64(addr).ok()? == 0x0000_0002_0000_3C01
            && rom.read_u32(addr + 8).ok()? == 0x000F_0000
        {
            // A stock unused-instrument record many games ship verbatim.
            return None;
        }
        let kind = InstrumentKind::from_code(code)?;
        let inst = match kind {
            InstrumentKind::Sample | InstrumentKind::FixedSample | InstrumentKind::GbWave => {
                MpInstrument::load_sample(rom, samples, addr, code, kind)
            }
            InstrumentKind::Square1 | InstrumentKind::Square2 | InstrumentKind::Noise => {
                MpInstrument::load_generator(rom, addr, code, kind)
            }
            InstrumentKind::KeySplit | InstrumentKind::Percussion => {
                if in_split {
                    return None;
                }
                self.load_split(rom, samples, addr, code, kind)
            }
        };
        inst.ok().map(|inst| self.register(inst))
    }

    /// Returns the id of a registry entry structurally equal to `inst`,
    /// adding one if there is none yet.
    fn register(&mut self, inst: MpInstrument) -> InstrumentId {
        if let Some(seen) = self.registry.iter().position(|entry| *entry == inst) {
            return InstrumentId(seen);
        }
        self.registry.push(inst);
        InstrumentId(self.registry.len() - 1)
    }

    fn load_split(
        &mut self,
        rom: &RomImage,
        samples: &SampleBank,
        addr: u32,
        code: u8,
        kind: InstrumentKind,
    ) -> Result<MpInstrument> {
        let split_addr = rom.read_pointer(addr + 4, true)?;
        let slots: Vec<Option<InstrumentId>> = if kind == InstrumentKind::Percussion {
            (0..128)
                .map(|i| self.intern(rom, samples, split_addr + RECORD_SIZE * i, true))
                .collect()
        } else {
            let table = rom.read_pointer(addr + 8, true)?;
            (0..128)
                .map(|i| {
                    let slot = rom.read_u8(table + i).ok()?;
                    self.intern(rom, samples, split_addr + RECORD_SIZE * u32::from(slot), true)
                })
                .collect()
        };
        Ok(MpInstrument {
            addr,
            code,
            kind,
            adsr: Adsr::default(),
            gate: 0.0,
            pan: 0,
            force_pan: false,
            payload: InstrumentPayload::Split { slots },
        })
    }

    /// The registry handle in bank slot `slot`, if a record loaded there.
    pub fn slot(&self, slot: u8) -> Option<InstrumentId> {
        self.slots.get(usize::from(slot)).copied().flatten()
    }

    /// Resolves a handle minted by this bank.
    pub fn instrument(&self, id: InstrumentId) -> &MpInstrument {
        &self.registry[id.0]
    }

    /// The instrument in bank slot `slot`, if one loaded.
    pub fn get(&self, slot: u8) -> Option<&MpInstrument> {
        self.slot(slot).map(|id| self.instrument(id))
    }

    /// Handle of the first loaded slot, used as the default before any
    /// instrument-select command.
    pub fn first(&self) -> Option<InstrumentId> {
        self.slots.iter().find_map(|slot| *slot)
    }

    /// Iterates loaded slots as `(slot, instrument)`.
    pub fn iter(&self) -> impl Iterator<Item = (u8, &MpInstrument)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, id)| id.map(|id| (slot as u8, self.instrument(id))))
    }

    /// Number of distinct instruments behind the slots, split
    /// sub-instruments included.
    pub fn registry_len(&self) -> usize {
        self.registry.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn put_ptr(data: &mut [u8], at: usize, target: u32) {
        data[at..at + 4].copy_from_slice(&(target | 0x0800_0000).to_le_bytes());
    }

    /// Square 2 record with a 25% duty cycle and a mild envelope.
    fn put_square(data: &mut [u8], at: usize) {
        data[at] = 2;
        data[at + 4] = 1;
        data[at + 8] = 7;
        data[at + 9] = 30;
        data[at + 10] = 15;
        data[at + 11] = 30;
    }

    /// Direct sample record at `at` pointing at a header at `sample`.
    fn put_sample(data: &mut [u8], at: usize, sample: usize, frames: u32) {
        data[at] = 0;
        data[at + 3] = 0xC0; // forced pan, center
        put_ptr(data, at + 4, sample as u32);
        data[at + 8] = 255;
        data[at + 9] = 128;
        data[at + 10] = 200;
        data[at + 11] = 128;
        // Header: no loop, rate 8000 << 10, length.
        data[sample + 4..sample + 8].copy_from_slice(&(8000u32 << 10).to_le_bytes());
        data[sample + 12..sample + 16].copy_from_slice(&frames.to_le_bytes());
    }

    /// Interns the single record at `addr` into a fresh registry.
    fn load_one(
        rom: &RomImage,
        samples: &SampleBank,
        addr: u32,
    ) -> Option<(InstrumentBank, InstrumentId)> {
        let mut bank = InstrumentBank {
            addr,
            registry: Vec::new(),
            slots: Vec::new(),
        };
        let id = bank.intern(rom, samples, addr, false)?;
        Some((bank, id))
    }

    #[test]
    fn test_generator_record_loads_and_validates() {
        let mut data = vec![0u8; 0x400];
        put_square(&mut data, 0x300);
        let rom = RomImage::new(data);
        let samples = SampleBank::new();

        let (bank, id) = load_one(&rom, &samples, 0x300).unwrap();
        let inst = bank.instrument(id);
        assert_eq!(inst.kind, InstrumentKind::Square2);
        assert!(matches!(
            inst.payload,
            InstrumentPayload::Generator { mode: 1, sweep: 0 }
        ));
        assert_relative_eq!(inst.adsr.attack, 1.0);
        assert_relative_eq!(inst.adsr.decay, 0.5);
        assert_relative_eq!(inst.adsr.sustain, 1.0);
    }

    #[test]
    fn test_generator_mode_out_of_range_leaves_the_slot_empty() {
        let mut data = vec![0u8; 0x400];
        put_square(&mut data, 0x300);
        data[0x304] = 4; // duty beyond the hardware range
        let rom = RomImage::new(data);

        assert!(load_one(&rom, &SampleBank::new(), 0x300).is_none());
    }

    #[test]
    fn test_noise_mode_limit_is_tighter() {
        let mut data = vec![0u8; 0x400];
        put_square(&mut data, 0x300);
        data[0x300] = 4;
        data[0x304] = 2;
        let rom = RomImage::new(data);

        assert!(load_one(&rom, &SampleBank::new(), 0x300).is_none());
    }

    #[test]
    fn test_alternate_codes_normalize() {
        let mut data = vec![0u8; 0x400];
        put_square(&mut data, 0x300);
        data[0x300] = 10;
        let rom = RomImage::new(data);

        let (bank, id) = load_one(&rom, &SampleBank::new(), 0x300).unwrap();
        let inst = bank.instrument(id);
        assert_eq!(inst.kind, InstrumentKind::Square2);
        assert_eq!(inst.code, 10);
        assert!(inst.display_name().contains("(Alt)"));
    }

    #[test]
    fn test_unused_fingerprint_and_filler_load_as_none() {
        let mut data = vec![0u8; 0x400];
        data[0x300..0x308].copy_from_slice(&0x0000_0002_0000_3C01u64.to_le_bytes());
        data[0x308..0x30C].copy_from_slice(&0x000F_0000u32.to_le_bytes());
        let rom = RomImage::new(data);
        let samples = SampleBank::new();

        assert!(load_one(&rom, &samples, 0x300).is_none());
        assert!(load_one(&rom, &samples, FILLER_ADDR).is_none());
    }

    #[test]
    fn test_unknown_type_byte_loads_as_none() {
        let mut data = vec![0u8; 0x400];
        data[0x300] = 5;
        let rom = RomImage::new(data);

        assert!(load_one(&rom, &SampleBank::new(), 0x300).is_none());
    }

    #[test]
    fn test_direct_sample_decodes_header_and_pcm() {
        let mut data = vec![0u8; 0x800];
        put_sample(&mut data, 0x300, 0x400, 4);
        data[0x410..0x414].copy_from_slice(&[0u8, 64, 128, 192]);
        let rom = RomImage::new(data);
        let samples = SampleBank::new();

        let (bank, id) = load_one(&rom, &samples, 0x300).unwrap();
        let inst = bank.instrument(id);
        assert_eq!(inst.kind, InstrumentKind::Sample);
        assert!(inst.force_pan);
        assert_eq!(inst.pan, 0x40);

        let key = match inst.payload {
            InstrumentPayload::Sample { key } => key,
            ref other => panic!("unexpected payload {other:?}"),
        };
        let pcm = samples.get(key).unwrap();
        assert_eq!(pcm.len(), 4);
        assert_relative_eq!(pcm.rate, 8000.0);
        assert!(pcm.loop_range.is_none());
        assert_relative_eq!(pcm.frame(1), 0.5);
        assert_relative_eq!(pcm.frame(2), -1.0);
    }

    #[test]
    fn test_fixed_sample_uses_the_rom_default_rate() {
        let mut data = vec![0u8; 0x800];
        put_sample(&mut data, 0x300, 0x400, 4);
        data[0x300] = 8;
        let rom = RomImage::new(data);
        let samples = SampleBank::new();

        let (bank, id) = load_one(&rom, &samples, 0x300).unwrap();
        let inst = bank.instrument(id);
        let key = match inst.payload {
            InstrumentPayload::Sample { key } => key,
            ref other => panic!("unexpected payload {other:?}"),
        };
        assert_relative_eq!(samples.get(key).unwrap().rate, 13379.0);

        let spec = inst.make_note(&bank, 72, 0.0, 127, Some(1.0)).unwrap();
        match spec.source {
            VoiceSource::Sample { ratio, .. } => assert_relative_eq!(ratio, 1.0),
            ref other => panic!("unexpected source {other:?}"),
        }
    }

    #[test]
    fn test_gb_wave_decodes_fixed_parameters() {
        let mut data = vec![0u8; 0x800];
        data[0x300] = 3;
        put_ptr(&mut data, 0x304, 0x400);
        data[0x30A] = 15;
        data[0x400] = 0xF0;
        let rom = RomImage::new(data);
        let samples = SampleBank::new();

        let (bank, id) = load_one(&rom, &samples, 0x300).unwrap();
        let inst = bank.instrument(id);
        assert_eq!(inst.kind, InstrumentKind::GbWave);
        assert_eq!(inst.kind.generator_code(), Some(3));

        let key = match inst.payload {
            InstrumentPayload::Sample { key } => key,
            ref other => panic!("unexpected payload {other:?}"),
        };
        let pcm = samples.get(key).unwrap();
        assert_eq!(pcm.len(), 32);
        assert_relative_eq!(pcm.rate, 4186.0);
        assert_eq!(pcm.loop_range, Some((0, 32)));
        assert_relative_eq!(pcm.frame(0), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_sample_cache_is_shared_between_records() {
        let mut data = vec![0u8; 0x800];
        put_sample(&mut data, 0x300, 0x400, 4);
        put_sample(&mut data, 0x310, 0x400, 4);
        let rom = RomImage::new(data);
        let samples = SampleBank::new();

        load_one(&rom, &samples, 0x300).unwrap();
        load_one(&rom, &samples, 0x310).unwrap();
        assert_eq!(samples.len(), 1);
    }

    #[test]
    fn test_make_note_rejects_out_of_range_sample_keys() {
        let mut data = vec![0u8; 0x800];
        put_sample(&mut data, 0x300, 0x400, 4);
        let rom = RomImage::new(data);
        let samples = SampleBank::new();

        let (bank, id) = load_one(&rom, &samples, 0x300).unwrap();
        let inst = bank.instrument(id);
        assert!(inst.make_note(&bank, 0x80, 0.0, 100, Some(1.0)).is_none());
        assert!(inst.make_note(&bank, 60, 0.0, 100, Some(1.0)).is_some());
    }

    #[test]
    fn test_generator_gate_clamps_timed_notes_only() {
        let mut data = vec![0u8; 0x400];
        put_square(&mut data, 0x300);
        data[0x302] = 51; // gate of a fifth of a second
        let rom = RomImage::new(data);
        let (bank, id) = load_one(&rom, &SampleBank::new(), 0x300).unwrap();
        let inst = bank.instrument(id);

        let clamped = inst.make_note(&bank, 60, 0.0, 127, Some(1.0)).unwrap();
        assert_relative_eq!(clamped.duration.unwrap(), 0.2);

        let held = inst.make_note(&bank, 60, 0.0, 127, None).unwrap();
        assert!(held.duration.is_none(), "ties are not gated");
    }

    #[test]
    fn test_envelope_spec_exponential_conversion() {
        let mut data = vec![0u8; 0x800];
        put_sample(&mut data, 0x300, 0x400, 4);
        let rom = RomImage::new(data);
        let (bank, id) = load_one(&rom, &SampleBank::new(), 0x300).unwrap();
        let inst = bank.instrument(id);

        // Attack byte 255 converts to an instant attack.
        let spec = inst.envelope_spec(1.0);
        assert!(spec.exp_decay);
        assert_relative_eq!(spec.attack, 0.0);
        assert_relative_eq!(spec.start_gain, 1.0);
        // Decay byte 128 is a per-frame ratio of one half.
        assert_relative_eq!(spec.decay, 0.5f64.ln() * LOG_COEF - LOG_ADJ, epsilon = 1e-9);
        assert_relative_eq!(spec.sustain, 200.0 / 255.0, epsilon = 1e-12);
    }

    #[test]
    fn test_envelope_spec_generator_factor_scaling() {
        let mut data = vec![0u8; 0x400];
        put_square(&mut data, 0x300);
        let rom = RomImage::new(data);
        let (bank, id) = load_one(&rom, &SampleBank::new(), 0x300).unwrap();
        let inst = bank.instrument(id);

        let spec = inst.envelope_spec(0.5);
        assert!(!spec.exp_decay);
        assert_relative_eq!(spec.attack, 0.5);
        assert_relative_eq!(spec.decay, 0.25);
        assert_relative_eq!(spec.release, 0.25);
        assert_relative_eq!(spec.start_gain, 1.0 - 60.0 / 255.0, epsilon = 1e-12);
    }

    #[test]
    fn test_bank_aliases_structural_duplicates() {
        let mut data = vec![0u8; 0x800];
        // Bank at 0x300 with identical squares in slots 0 and 2.
        put_square(&mut data, 0x300);
        put_square(&mut data, 0x318);
        let rom = RomImage::new(data);
        let bank = InstrumentBank::load(&rom, &SampleBank::new(), 0x300);

        let a = bank.slot(0).unwrap();
        let b = bank.slot(2).unwrap();
        assert_eq!(a, b, "identical records share one registry entry");
        assert!(bank.slot(1).is_none(), "the blank record in between is empty");
        assert_eq!(bank.iter().count(), 2);
        assert_eq!(bank.first(), Some(a));
        assert_eq!(bank.registry_len(), 1);
    }

    #[test]
    fn test_percussion_split_delegates_and_forces_pan() {
        let mut data = vec![0u8; 0x2000];
        // Percussion record at 0x300, sub-records at 0x800.
        data[0x300] = 0x80;
        put_ptr(&mut data, 0x304, 0x800);
        // Key 60's sub-record is a sample forced well left of center.
        put_sample(&mut data, 0x800 + 12 * 60, 0x1800, 4);
        data[0x800 + 12 * 60 + 3] = 0x90;
        let rom = RomImage::new(data);
        let samples = SampleBank::new();

        let (bank, id) = load_one(&rom, &samples, 0x300).unwrap();
        let inst = bank.instrument(id);
        assert_eq!(inst.kind, InstrumentKind::Percussion);

        let spec = inst.make_note(&bank, 60, 0.0, 100, Some(0.5)).unwrap();
        assert_relative_eq!(spec.pan.unwrap(), 16.0 / 128.0);
        assert!(inst.make_note(&bank, 61, 0.0, 100, Some(0.5)).is_none());
    }

    #[test]
    fn test_key_split_goes_through_the_remap_table() {
        let mut data = vec![0u8; 0x2000];
        data[0x300] = 0x40;
        put_ptr(&mut data, 0x304, 0x800);
        put_ptr(&mut data, 0x308, 0x700);
        // Keys 40 and 41 both remap to sub-record 2.
        data[0x700 + 40] = 2;
        data[0x700 + 41] = 2;
        put_square(&mut data, 0x800 + 12 * 2);
        let rom = RomImage::new(data);

        let (bank, id) = load_one(&rom, &SampleBank::new(), 0x300).unwrap();
        let inst = bank.instrument(id);
        assert_eq!(inst.kind, InstrumentKind::KeySplit);
        assert!(inst.make_note(&bank, 40, 0.0, 100, Some(0.5)).is_some());
        assert!(inst.make_note(&bank, 41, 0.0, 100, Some(0.5)).is_some());
        assert!(inst.make_note(&bank, 42, 0.0, 100, Some(0.5)).is_none());
    }

    #[test]
    fn test_split_of_split_is_rejected() {
        let mut data = vec![0u8; 0x2000];
        data[0x300] = 0x80;
        put_ptr(&mut data, 0x304, 0x800);
        // Key 0's sub-record claims to be another percussion split.
        data[0x800] = 0x80;
        put_ptr(&mut data, 0x804, 0x800);
        put_sample(&mut data, 0x800 + 12, 0x1800, 4);
        let rom = RomImage::new(data);

        let (bank, id) = load_one(&rom, &SampleBank::new(), 0x300).unwrap();
        let inst = bank.instrument(id);
        assert!(inst.make_note(&bank, 0, 0.0, 100, Some(0.5)).is_none());
        assert!(inst.make_note(&bank, 1, 0.0, 100, Some(0.5)).is_some());
    }
}
