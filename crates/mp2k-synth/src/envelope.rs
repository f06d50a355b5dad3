//! ADSR amplitude envelope node.
//!
//! Two envelope families feed this node. The generator family supplies
//! linear segment times in seconds. The sampled family mirrors a hardware
//! multiplier-per-frame scheme: its decay and release arrive as negative
//! per-second log rates (the loader curve-fits the raw multiplier bytes
//! before they reach the engine), and the gain follows `e^(rate * t)` down
//! to the sustain floor.

/// Gain floor below which a releasing exponential voice counts as silent.
const SILENCE_FLOOR: f64 = 1.0e-3;

/// Envelope parameters attached to a note-start command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvelopeSpec {
    /// Gain at the instant the note starts.
    pub start_gain: f64,
    /// Linear attack time to full gain, in seconds.
    pub attack: f64,
    /// Decay segment: seconds when linear, negative log rate when
    /// exponential.
    pub decay: f64,
    /// Sustain level, 0..1.
    pub sustain: f64,
    /// Release segment: seconds when linear, negative log rate when
    /// exponential.
    pub release: f64,
    /// Selects the exponential decay/release family.
    pub exp_decay: bool,
}

impl Default for EnvelopeSpec {
    /// A flat envelope: full gain for the whole note, instant release.
    fn default() -> Self {
        EnvelopeSpec {
            start_gain: 1.0,
            attack: 0.0,
            decay: 0.0,
            sustain: 1.0,
            release: 0.0,
            exp_decay: false,
        }
    }
}

impl EnvelopeSpec {
    /// Upper bound in seconds on the audible tail after release begins.
    pub fn release_tail(&self) -> f64 {
        if self.exp_decay {
            if self.release == 0.0 {
                0.0
            } else {
                (SILENCE_FLOOR.ln() / self.release).max(0.0)
            }
        } else {
            self.release.max(0.0)
        }
    }
}

/// Stateful envelope, stepped once per output sample.
#[derive(Debug, Clone)]
pub struct AdsrEnvelope {
    spec: EnvelopeSpec,
    dt: f64,
    t: f64,
    released_at: Option<f64>,
    release_gain: f64,
    dead: bool,
}

impl AdsrEnvelope {
    /// Create an envelope stepped at `sample_rate`.
    pub fn new(spec: EnvelopeSpec, sample_rate: f64) -> Self {
        AdsrEnvelope {
            spec,
            dt: 1.0 / sample_rate,
            t: 0.0,
            released_at: None,
            release_gain: 0.0,
            dead: false,
        }
    }

    fn held_gain(&self, t: f64) -> f64 {
        let spec = &self.spec;
        if spec.attack > 0.0 && t < spec.attack {
            return spec.start_gain + (1.0 - spec.start_gain) * (t / spec.attack);
        }
        let d = (t - spec.attack).max(0.0);
        if spec.exp_decay {
            if spec.decay == 0.0 {
                spec.sustain
            } else {
                (spec.decay * d).exp().max(spec.sustain)
            }
        } else if spec.decay <= 0.0 {
            spec.sustain
        } else {
            (1.0 - (1.0 - spec.sustain) * (d / spec.decay)).max(spec.sustain)
        }
    }

    /// Gain for the current sample position; advances one sample step.
    pub fn next_gain(&mut self) -> f64 {
        if self.dead {
            return 0.0;
        }
        let gain = match self.released_at {
            Some(release_start) => {
                let d = self.t - release_start;
                let g = if self.spec.exp_decay {
                    if self.spec.release == 0.0 {
                        0.0
                    } else {
                        self.release_gain * (self.spec.release * d).exp()
                    }
                } else if self.spec.release <= 0.0 {
                    0.0
                } else {
                    self.release_gain * (1.0 - d / self.spec.release)
                };
                if g <= SILENCE_FLOOR {
                    self.dead = true;
                }
                g.max(0.0)
            }
            None => self.held_gain(self.t),
        };
        self.t += self.dt;
        gain
    }

    /// Begin the release segment at the current position. Idempotent.
    pub fn release(&mut self) {
        if self.released_at.is_none() {
            self.release_gain = self.held_gain(self.t);
            self.released_at = Some(self.t);
        }
    }

    /// Hard stop; the envelope reports dead from the next sample on.
    pub fn kill(&mut self) {
        self.dead = true;
    }

    /// True when nothing further will sound.
    pub fn is_dead(&self) -> bool {
        self.dead
    }
}
