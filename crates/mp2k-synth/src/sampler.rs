//! Resampling voice over decoded PCM.

use std::sync::Arc;

use crate::pcm::SampleData;

/// Playback cursor over one [`SampleData`], stepped at an arbitrary ratio
/// with linear interpolation.
#[derive(Debug, Clone)]
pub struct Sampler {
    data: Arc<SampleData>,
    pos: f64,
    base_step: f64,
    done: bool,
}

impl Sampler {
    /// Create a cursor; `ratio` retunes the sample relative to its native
    /// rate, `sample_rate` is the output rate.
    pub fn new(data: Arc<SampleData>, ratio: f64, sample_rate: f64) -> Self {
        let base_step = ratio * data.rate / sample_rate;
        let done = data.is_empty();
        Sampler {
            data,
            pos: 0.0,
            base_step,
            done,
        }
    }

    /// True once a one-shot sample has run past its last frame.
    pub fn finished(&self) -> bool {
        self.done
    }

    /// Produce the next frame, with the step scaled by `pitch_ratio`.
    pub fn next_sample(&mut self, pitch_ratio: f64) -> f32 {
        if self.done {
            return 0.0;
        }
        let idx = self.pos as usize;
        let frac = (self.pos - idx as f64) as f32;
        let here = self.data.frame(idx);
        let next_idx = match self.data.loop_range {
            // The frame after the loop's last frame is the loop start.
            Some((start, end)) if end > start && (idx + 1) as u32 >= end => start as usize,
            _ => idx + 1,
        };
        let next = self.data.frame(next_idx);
        let out = here + (next - here) * frac;

        self.pos += self.base_step * pitch_ratio;
        match self.data.loop_range {
            Some((start, end)) if end > start => {
                let (start, end) = (f64::from(start), f64::from(end));
                if self.pos >= end {
                    self.pos = start + (self.pos - end) % (end - start);
                }
            }
            _ => {
                if self.pos >= self.data.len() as f64 {
                    self.done = true;
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(len: usize) -> Vec<f32> {
        (0..len).map(|i| i as f32).collect()
    }

    #[test]
    fn test_unity_ratio_replays_frames() {
        let data = Arc::new(SampleData::new(ramp(4), 100.0, None));
        let mut voice = Sampler::new(data, 1.0, 100.0);
        let out: Vec<f32> = (0..4).map(|_| voice.next_sample(1.0)).collect();
        assert_eq!(out, vec![0.0, 1.0, 2.0, 3.0]);
        assert!(voice.finished(), "one-shot should end after its last frame");
        assert_eq!(voice.next_sample(1.0), 0.0, "finished voice is silent");
    }

    #[test]
    fn test_half_ratio_interpolates() {
        let data = Arc::new(SampleData::new(ramp(4), 100.0, None));
        let mut voice = Sampler::new(data, 0.5, 100.0);
        let out: Vec<f32> = (0..4).map(|_| voice.next_sample(1.0)).collect();
        assert_eq!(out, vec![0.0, 0.5, 1.0, 1.5]);
    }

    #[test]
    fn test_loop_region_wraps() {
        // Frames 0..4 with loop over [2, 4): after the intro it alternates 2, 3.
        let data = Arc::new(SampleData::new(ramp(4), 100.0, Some((2, 4))));
        let mut voice = Sampler::new(data, 1.0, 100.0);
        let out: Vec<f32> = (0..8).map(|_| voice.next_sample(1.0)).collect();
        assert_eq!(out, vec![0.0, 1.0, 2.0, 3.0, 2.0, 3.0, 2.0, 3.0]);
        assert!(!voice.finished(), "looping voice never finishes on its own");
    }

    #[test]
    fn test_loop_seam_interpolates_toward_loop_start() {
        let data = Arc::new(SampleData::new(vec![0.0, 1.0, 0.0, 1.0], 100.0, Some((2, 4))));
        let mut voice = Sampler::new(data, 0.5, 100.0);
        // Position 3.5 sits between the loop's last frame (1.0) and the
        // loop start frame (0.0).
        let out: Vec<f32> = (0..8).map(|_| voice.next_sample(1.0)).collect();
        assert_eq!(out[7], 0.5, "seam should blend into the loop start");
    }

    #[test]
    fn test_empty_sample_is_immediately_finished() {
        let data = Arc::new(SampleData::new(Vec::new(), 100.0, None));
        let voice = Sampler::new(data, 1.0, 100.0);
        assert!(voice.finished());
    }
}
