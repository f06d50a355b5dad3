//! Fixed waveform presets of the hardware generator channels.
//!
//! The square channels offer four duty cycles; the noise channel is a
//! Galois-style LFSR with a 15-bit tap and a short 7-stage tap that gives
//! the classic metallic timbre.

/// Waveform preset selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WavePreset {
    /// 12.5% duty square.
    Square125,
    /// 25% duty square.
    Square25,
    /// 50% duty square.
    Square50,
    /// 75% duty square.
    Square75,
    /// 15-bit LFSR noise.
    Noise15,
    /// 7-stage LFSR noise (metallic).
    Noise7,
}

impl WavePreset {
    /// Duty fraction for square presets.
    fn duty(self) -> Option<f64> {
        match self {
            WavePreset::Square125 => Some(0.125),
            WavePreset::Square25 => Some(0.25),
            WavePreset::Square50 => Some(0.5),
            WavePreset::Square75 => Some(0.75),
            WavePreset::Noise15 | WavePreset::Noise7 => None,
        }
    }

    /// True for the LFSR presets.
    pub fn is_noise(self) -> bool {
        self.duty().is_none()
    }
}

/// The shift register is clocked this many times per nominal waveform cycle,
/// keeping the noise spectrum wide while still tracking the note pitch.
const NOISE_CLOCK_MULT: f64 = 64.0;

/// Phase-stepped generator for one waveform preset.
#[derive(Debug, Clone)]
pub struct Oscillator {
    preset: WavePreset,
    phase: f64,
    base_step: f64,
    lfsr: u16,
}

impl Oscillator {
    /// Create a generator producing `freq` Hz at the given output rate.
    pub fn new(preset: WavePreset, freq: f64, sample_rate: f64) -> Self {
        let cycles = if preset.is_noise() {
            freq * NOISE_CLOCK_MULT
        } else {
            freq
        };
        Oscillator {
            preset,
            phase: 0.0,
            base_step: cycles / sample_rate,
            lfsr: 0x7FFF,
        }
    }

    /// Produce the next sample, with the phase step scaled by `pitch_ratio`.
    #[inline]
    pub fn next_sample(&mut self, pitch_ratio: f64) -> f32 {
        let out = match self.preset.duty() {
            Some(duty) => {
                if self.phase < duty {
                    1.0
                } else {
                    -1.0
                }
            }
            None => {
                // Bit 0 low drives the DAC high on this hardware.
                if self.lfsr & 1 == 0 {
                    1.0
                } else {
                    -1.0
                }
            }
        };
        self.phase += self.base_step * pitch_ratio;
        while self.phase >= 1.0 {
            self.phase -= 1.0;
            if self.preset.is_noise() {
                self.step_lfsr();
            }
        }
        out
    }

    fn step_lfsr(&mut self) {
        let feedback = (self.lfsr ^ (self.lfsr >> 1)) & 1;
        self.lfsr >>= 1;
        self.lfsr |= feedback << 14;
        if self.preset == WavePreset::Noise7 {
            self.lfsr = (self.lfsr & !(1 << 6)) | (feedback << 6);
        }
    }
}
