//! Pitch to output-frequency mapping.
//!
//! Notes are tuned in twelve-tone equal temperament around A4 = 440 Hz. The
//! remote beepers only accept `[MIN_FREQUENCY, MAX_FREQUENCY]`, so anything
//! outside that window is replaced by a harmonic (or sub-harmonic) that lands
//! inside it.

/// Lowest frequency the remote devices accept, in Hz.
pub const MIN_FREQUENCY: f64 = 20.0;
/// Highest frequency the remote devices accept, in Hz.
pub const MAX_FREQUENCY: f64 = 20_000.0;

const CONCERT_A_HZ: f64 = 440.0;
const CONCERT_A_KEY: f64 = 69.0;

/// Converts a (possibly fractional) MIDI semitone value to an audible
/// frequency in Hz.
pub fn midi_pitch_to_frequency(semitone: f64) -> f64 {
    fold_frequency(equal_temperament(semitone))
}

/// Raw equal-temperament frequency for a semitone value, without folding.
pub fn equal_temperament(semitone: f64) -> f64 {
    CONCERT_A_HZ * 2f64.powf((semitone - CONCERT_A_KEY) / 12.0)
}

/// Folds an arbitrary frequency onto the supported output range.
///
/// Low tones are raised to their third or fifth harmonic, high tones are
/// divided by three or five. Tones too far out for either are pinned to the
/// nearest edge of the range.
pub fn fold_frequency(freq: f64) -> f64 {
    if freq.is_nan() {
        return MIN_FREQUENCY;
    }
    if freq < MIN_FREQUENCY {
        if freq >= MIN_FREQUENCY / 3.0 {
            return freq * 3.0;
        }
        if freq >= MIN_FREQUENCY / 5.0 {
            return freq * 5.0;
        }
        return MIN_FREQUENCY;
    }
    if freq > MAX_FREQUENCY {
        if freq <= MAX_FREQUENCY * 3.0 {
            return freq / 3.0;
        }
        if freq <= MAX_FREQUENCY * 5.0 {
            return freq / 5.0;
        }
        return MAX_FREQUENCY;
    }
    freq
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concert_a_is_440() {
        assert_eq!(midi_pitch_to_frequency(69.0), 440.0);
        assert!((midi_pitch_to_frequency(81.0) - 880.0).abs() < 1e-9);
    }

    #[test]
    fn range_edges_pass_through_unchanged() {
        assert_eq!(fold_frequency(20.0), 20.0);
        assert_eq!(fold_frequency(20_000.0), 20_000.0);
    }

    #[test]
    fn low_tones_fold_onto_harmonics() {
        assert!((fold_frequency(6.667) - 20.0).abs() < 0.01);
        assert_eq!(fold_frequency(10.0), 30.0);
        assert_eq!(fold_frequency(5.0), 25.0);
        assert_eq!(fold_frequency(4.0), 20.0);
        assert_eq!(fold_frequency(3.9), 20.0);
        assert_eq!(fold_frequency(0.0), 20.0);
    }

    #[test]
    fn high_tones_fold_onto_subharmonics() {
        assert_eq!(fold_frequency(60_000.0), 20_000.0);
        assert_eq!(fold_frequency(30_000.0), 10_000.0);
        assert_eq!(fold_frequency(70_000.0), 14_000.0);
        assert_eq!(fold_frequency(100_000.0), 20_000.0);
        assert_eq!(fold_frequency(100_001.0), 20_000.0);
    }

    #[test]
    fn output_always_within_device_range() {
        let mut semitone = -200.0;
        while semitone <= 300.0 {
            let freq = midi_pitch_to_frequency(semitone);
            assert!(
                (MIN_FREQUENCY..=MAX_FREQUENCY).contains(&freq),
                "{semitone} -> {freq}"
            );
            semitone += 0.25;
        }
        for extreme in [f64::NEG_INFINITY, f64::INFINITY, f64::NAN] {
            let freq = midi_pitch_to_frequency(extreme);
            assert!((MIN_FREQUENCY..=MAX_FREQUENCY).contains(&freq));
        }
    }
}
