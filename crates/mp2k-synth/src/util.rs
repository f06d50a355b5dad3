//! Pitch helpers shared by the engine and its callers.

/// Concert pitch of MIDI key 69 (A4), in Hz.
pub const A4_FREQ: f64 = 440.0;

/// MIDI key number of A4.
pub const A4_KEY: f64 = 69.0;

/// Frequency in Hz of a (possibly fractional) MIDI key number.
#[inline]
pub fn note_to_freq(key: f64) -> f64 {
    A4_FREQ * ((key - A4_KEY) / 12.0).exp2()
}

/// Frequency ratio of `key` relative to middle C (key 60).
#[inline]
pub fn middle_c_ratio(key: f64) -> f64 {
    note_to_freq(key) / note_to_freq(60.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_note_to_freq_reference_points() {
        assert_relative_eq!(note_to_freq(69.0), 440.0, epsilon = 1e-9);
        assert_relative_eq!(note_to_freq(57.0), 220.0, epsilon = 1e-9);
        assert_relative_eq!(note_to_freq(60.0), 261.625565, epsilon = 1e-5);
    }

    #[test]
    fn test_middle_c_ratio_is_octave_linear() {
        assert_relative_eq!(middle_c_ratio(60.0), 1.0, epsilon = 1e-12);
        assert_relative_eq!(middle_c_ratio(72.0), 2.0, epsilon = 1e-12);
        assert_relative_eq!(middle_c_ratio(48.0), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_fractional_keys_interpolate_between_semitones() {
        let low = note_to_freq(60.0);
        let mid = note_to_freq(60.5);
        let high = note_to_freq(61.0);
        assert!(
            low < mid && mid < high,
            "fractional key should land between neighbours: {low} {mid} {high}"
        );
    }
}
