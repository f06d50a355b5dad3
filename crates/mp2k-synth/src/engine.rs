//! Offline command scheduler and stereo mixer.
//!
//! Commands accumulate on per-channel busses; `render` then mixes every
//! scheduled voice into one stereo buffer. Channel automation (gain, pan,
//! pitch) is step-held breakpoints: the latest point at or before the
//! current time wins.

use std::collections::HashMap;
use std::sync::Arc;

use crate::command::{ChannelCtrl, NoteOn, SynthCommand, VoiceId, VoiceSource};
use crate::envelope::AdsrEnvelope;
use crate::oscillator::Oscillator;
use crate::pcm::SampleBank;
use crate::sampler::Sampler;
use crate::{Result, SynthError};

/// Default output rate of the renderer, in Hz.
pub const DEFAULT_RENDER_RATE: u32 = 32768;

/// Step-held automation lane.
#[derive(Debug, Clone, Default)]
struct Automation {
    points: Vec<(f64, f64)>,
}

impl Automation {
    fn push(&mut self, time: f64, value: f64) {
        self.points.push((time, value));
    }

    fn sorted(&self) -> Automation {
        let mut points = self.points.clone();
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        Automation { points }
    }

    fn last_time(&self) -> f64 {
        self.points.iter().fold(0.0, |acc, &(t, _)| acc.max(t))
    }
}

/// Walking read cursor over a sorted automation lane.
struct AutoCursor<'a> {
    lane: &'a Automation,
    idx: usize,
    value: f64,
}

impl<'a> AutoCursor<'a> {
    fn new(lane: &'a Automation, initial: f64) -> Self {
        AutoCursor {
            lane,
            idx: 0,
            value: initial,
        }
    }

    #[inline]
    fn value_at(&mut self, t: f64) -> f64 {
        while self.idx < self.lane.points.len() && self.lane.points[self.idx].0 <= t {
            self.value = self.lane.points[self.idx].1;
            self.idx += 1;
        }
        self.value
    }
}

#[derive(Debug, Clone, Default)]
struct ChannelBus {
    gain: Automation,
    pan: Automation,
    pitch: Automation,
    notes: Vec<NoteOn>,
}

/// Batch synthesis engine.
pub struct Engine {
    sample_rate: u32,
    samples: Arc<SampleBank>,
    channels: Vec<ChannelBus>,
    kills: HashMap<VoiceId, Vec<(f64, bool)>>,
}

impl Engine {
    /// Create an engine rendering at `sample_rate` over the given sample
    /// store.
    pub fn new(sample_rate: u32, samples: Arc<SampleBank>) -> Self {
        Engine {
            sample_rate,
            samples,
            channels: Vec::new(),
            kills: HashMap::new(),
        }
    }

    /// Output rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Shared sample store handle.
    pub fn sample_bank(&self) -> &Arc<SampleBank> {
        &self.samples
    }

    /// Grow the channel table to at least `n` busses.
    pub fn ensure_channels(&mut self, n: usize) {
        while self.channels.len() < n {
            self.channels.push(ChannelBus::default());
        }
    }

    /// Number of channel busses.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Schedule one command on a channel bus.
    pub fn apply(&mut self, channel: usize, cmd: SynthCommand) -> Result<()> {
        if channel >= self.channels.len() {
            return Err(SynthError::UnknownChannel { channel });
        }
        match cmd {
            SynthCommand::NoteOn(note) => {
                if let VoiceSource::Sample { key, .. } = note.source {
                    if !self.samples.contains(key) {
                        return Err(SynthError::UnknownSample { key });
                    }
                }
                self.channels[channel].notes.push(note);
            }
            SynthCommand::Kill {
                voice,
                time,
                immediate,
            } => {
                self.kills.entry(voice).or_default().push((time, immediate));
            }
            SynthCommand::Channel { ctrl, value, time } => {
                let bus = &mut self.channels[channel];
                match ctrl {
                    ChannelCtrl::Gain => bus.gain.push(time, value),
                    ChannelCtrl::Pan => bus.pan.push(time, value),
                    ChannelCtrl::PitchBend => bus.pitch.push(time, value),
                }
            }
        }
        Ok(())
    }

    /// Mix everything scheduled so far into an interleaved stereo buffer.
    pub fn render(&self) -> Vec<(f32, f32)> {
        let rate = f64::from(self.sample_rate);

        // Latest scheduled timestamp bounds voices that were never released.
        let mut latest = 0.0_f64;
        for bus in &self.channels {
            latest = latest
                .max(bus.gain.last_time())
                .max(bus.pan.last_time())
                .max(bus.pitch.last_time());
            for note in &bus.notes {
                latest = latest.max(note.start);
            }
        }
        for times in self.kills.values() {
            for &(t, _) in times {
                latest = latest.max(t);
            }
        }

        struct Plan<'a> {
            note: &'a NoteOn,
            channel: usize,
            release_at: f64,
            hard_end: Option<f64>,
        }

        let mut plans = Vec::new();
        let mut total_end = 0.0_f64;
        for (channel, bus) in self.channels.iter().enumerate() {
            for note in &bus.notes {
                let mut release_at = note.duration.map(|d| note.start + d);
                let mut hard_end: Option<f64> = None;
                if let Some(times) = self.kills.get(&note.voice) {
                    for &(t, immediate) in times {
                        let t = t.max(note.start);
                        if immediate {
                            hard_end = Some(hard_end.map_or(t, |h: f64| h.min(t)));
                        } else {
                            release_at = Some(release_at.map_or(t, |r: f64| r.min(t)));
                        }
                    }
                }
                let release_at = release_at.unwrap_or_else(|| latest.max(note.start));
                let voice_end = match hard_end {
                    Some(h) => h.min(release_at + note.envelope.release_tail()),
                    None => release_at + note.envelope.release_tail(),
                };
                total_end = total_end.max(voice_end);
                plans.push(Plan {
                    note,
                    channel,
                    release_at,
                    hard_end,
                });
            }
        }

        let frames = (total_end * rate).ceil() as usize;
        let mut buffer = vec![(0.0_f32, 0.0_f32); frames];
        if frames == 0 {
            return buffer;
        }

        enum Source {
            Pcm(Sampler),
            Wave(Oscillator),
        }

        let lanes: Vec<(Automation, Automation, Automation)> = self
            .channels
            .iter()
            .map(|bus| (bus.gain.sorted(), bus.pan.sorted(), bus.pitch.sorted()))
            .collect();

        for plan in &plans {
            let note = plan.note;
            let mut source = match note.source {
                VoiceSource::Sample { key, ratio } => match self.samples.get(key) {
                    Some(data) => Source::Pcm(Sampler::new(data, ratio, rate)),
                    None => continue,
                },
                VoiceSource::Wave { preset, freq } => {
                    Source::Wave(Oscillator::new(preset, freq, rate))
                }
            };
            let mut env = AdsrEnvelope::new(note.envelope, rate);
            let (gain_lane, pan_lane, pitch_lane) = &lanes[plan.channel];
            let mut gain_cur = AutoCursor::new(gain_lane, 1.0);
            let mut pan_cur = AutoCursor::new(pan_lane, 0.5);
            let mut pitch_cur = AutoCursor::new(pitch_lane, 1.0);

            let start_frame = (note.start * rate).round() as usize;
            for (i, frame) in buffer.iter_mut().enumerate().skip(start_frame) {
                let t = i as f64 / rate;
                if let Some(h) = plan.hard_end {
                    if t >= h {
                        break;
                    }
                }
                if t >= plan.release_at {
                    env.release();
                }
                let pitch = pitch_cur.value_at(t);
                let raw = match &mut source {
                    Source::Pcm(voice) => {
                        if voice.finished() {
                            break;
                        }
                        voice.next_sample(pitch)
                    }
                    Source::Wave(osc) => osc.next_sample(pitch),
                };
                let shaped = f64::from(raw) * env.next_gain();
                if env.is_dead() && shaped == 0.0 {
                    break;
                }
                let amp = shaped * note.gain * gain_cur.value_at(t);
                let pan = note.pan.unwrap_or_else(|| pan_cur.value_at(t));
                frame.0 += (amp * (1.0 - pan).sqrt()) as f32;
                frame.1 += (amp * pan.sqrt()) as f32;
            }
        }

        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::EnvelopeSpec;
    use crate::oscillator::WavePreset;
    use crate::pcm::SampleKey;

    fn flat_note(voice: u64, start: f64, duration: Option<f64>, freq: f64) -> SynthCommand {
        SynthCommand::NoteOn(NoteOn {
            voice: VoiceId(voice),
            start,
            duration,
            source: VoiceSource::Wave {
                preset: WavePreset::Square50,
                freq,
            },
            gain: 1.0,
            pan: None,
            envelope: EnvelopeSpec::default(),
        })
    }

    #[test]
    fn test_empty_engine_renders_nothing() {
        let engine = Engine::new(1000, Arc::new(SampleBank::new()));
        assert!(engine.render().is_empty());
    }

    #[test]
    fn test_unknown_channel_is_rejected() {
        let mut engine = Engine::new(1000, Arc::new(SampleBank::new()));
        let err = engine.apply(0, flat_note(1, 0.0, Some(0.1), 100.0));
        assert_eq!(err, Err(SynthError::UnknownChannel { channel: 0 }));
    }

    #[test]
    fn test_unregistered_sample_is_rejected() {
        let mut engine = Engine::new(1000, Arc::new(SampleBank::new()));
        engine.ensure_channels(1);
        let cmd = SynthCommand::NoteOn(NoteOn {
            voice: VoiceId(1),
            start: 0.0,
            duration: Some(0.1),
            source: VoiceSource::Sample {
                key: SampleKey(9),
                ratio: 1.0,
            },
            gain: 1.0,
            pan: None,
            envelope: EnvelopeSpec::default(),
        });
        assert_eq!(
            engine.apply(0, cmd),
            Err(SynthError::UnknownSample { key: SampleKey(9) })
        );
    }

    #[test]
    fn test_note_duration_bounds_output() {
        let mut engine = Engine::new(1000, Arc::new(SampleBank::new()));
        engine.ensure_channels(1);
        engine.apply(0, flat_note(1, 0.0, Some(0.1), 100.0)).unwrap();
        let buf = engine.render();
        // Flat envelope with zero release: exactly the 100 sounding frames.
        assert_eq!(buf.len(), 100);
        assert!(buf.iter().any(|&(l, r)| l != 0.0 || r != 0.0));
    }

    #[test]
    fn test_immediate_kill_truncates() {
        let mut engine = Engine::new(1000, Arc::new(SampleBank::new()));
        engine.ensure_channels(1);
        engine.apply(0, flat_note(1, 0.0, Some(1.0), 100.0)).unwrap();
        engine
            .apply(
                0,
                SynthCommand::Kill {
                    voice: VoiceId(1),
                    time: 0.05,
                    immediate: true,
                },
            )
            .unwrap();
        let buf = engine.render();
        assert!(
            buf.iter().skip(51).all(|&(l, r)| l == 0.0 && r == 0.0),
            "killed voice must not sound past the kill point"
        );
        assert!(buf.iter().take(50).any(|&(l, _)| l != 0.0));
    }

    #[test]
    fn test_channel_gain_scales_voice() {
        let mut engine = Engine::new(1000, Arc::new(SampleBank::new()));
        engine.ensure_channels(1);
        engine
            .apply(
                0,
                SynthCommand::Channel {
                    ctrl: ChannelCtrl::Gain,
                    value: 0.0,
                    time: 0.0,
                },
            )
            .unwrap();
        engine.apply(0, flat_note(1, 0.0, Some(0.1), 100.0)).unwrap();
        let buf = engine.render();
        assert!(
            buf.iter().all(|&(l, r)| l == 0.0 && r == 0.0),
            "zero channel gain must silence the voice"
        );
    }

    #[test]
    fn test_forced_pan_overrides_channel() {
        let mut engine = Engine::new(1000, Arc::new(SampleBank::new()));
        engine.ensure_channels(1);
        let mut note = match flat_note(1, 0.0, Some(0.05), 100.0) {
            SynthCommand::NoteOn(n) => n,
            _ => unreachable!(),
        };
        note.pan = Some(1.0);
        engine.apply(0, SynthCommand::NoteOn(note)).unwrap();
        let buf = engine.render();
        assert!(
            buf.iter().all(|&(l, _)| l == 0.0),
            "hard-right pan leaves the left channel silent"
        );
        assert!(buf.iter().any(|&(_, r)| r != 0.0));
    }

    #[test]
    fn test_untimed_voice_ends_at_latest_event() {
        let mut engine = Engine::new(1000, Arc::new(SampleBank::new()));
        engine.ensure_channels(1);
        engine.apply(0, flat_note(1, 0.0, None, 100.0)).unwrap();
        engine
            .apply(
                0,
                SynthCommand::Channel {
                    ctrl: ChannelCtrl::Gain,
                    value: 1.0,
                    time: 0.2,
                },
            )
            .unwrap();
        let buf = engine.render();
        assert_eq!(buf.len(), 200, "unkilled voice is bounded by the last event");
    }
}
