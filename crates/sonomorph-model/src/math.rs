//! Fixed-point log-domain codecs and pitch/gain conversions.
//!
//! The encoded format stores magnitudes, frequencies and phases as `u16`
//! for compact storage:
//!
//! - magnitudes and noise band values in "idb" units: 1/64 dB steps with a
//!   512 dB offset, so linear interpolation of `u16` values is linear
//!   interpolation in dB,
//! - partial frequencies as a log2-domain ratio to the fundamental (4096
//!   steps per octave, range 2^-8 .. 2^8),
//! - phases in turns (65536 per cycle).

use std::f64::consts::TAU;

/// idb value of -96 dB, the quiet floor used during morph interpolation.
pub const IDB_M96: u16 = (512 - 96) * 64;

/// ifreq value of ratio 1.0 (the fundamental itself).
pub const IFREQ_UNITY: u16 = 8 * 4096;

/// ifreq steps per octave.
pub const IFREQ_STEPS_PER_OCTAVE: f64 = 4096.0;

/// Convert a dB value to idb units.
#[inline]
pub fn db_to_idb(db: f64) -> u16 {
    let idb = ((db + 512.0) * 64.0).round();
    idb.clamp(0.0, 65535.0) as u16
}

/// Convert idb units back to dB.
#[inline]
pub fn idb_to_db(idb: u16) -> f64 {
    idb as f64 / 64.0 - 512.0
}

/// Convert idb units to a linear magnitude factor.
#[inline]
pub fn idb_to_factor(idb: u16) -> f64 {
    db_to_factor(idb_to_db(idb))
}

/// Convert a linear magnitude factor to idb units.
///
/// Non-positive factors map to 0 (hard silence).
#[inline]
pub fn factor_to_idb(factor: f64) -> u16 {
    if factor > 0.0 {
        db_to_idb(factor_to_db(factor))
    } else {
        0
    }
}

/// Convert a linear gain factor to a signed idb delta.
///
/// Adding the delta to an idb value multiplies the decoded magnitude by
/// `factor`.
#[inline]
pub fn factor_to_delta_idb(factor: f64) -> i32 {
    if factor > 0.0 {
        (factor_to_db(factor) * 64.0).round() as i32
    } else {
        // large enough to clamp any idb value to 0
        -65536
    }
}

/// Convert a dB value to a linear factor.
#[inline]
pub fn db_to_factor(db: f64) -> f64 {
    10.0_f64.powf(db / 20.0)
}

/// Convert a linear factor to dB.
#[inline]
pub fn factor_to_db(factor: f64) -> f64 {
    20.0 * factor.log10()
}

/// Encode a frequency ratio (relative to the fundamental) as ifreq units.
#[inline]
pub fn ratio_to_ifreq(ratio: f64) -> u16 {
    if ratio > 0.0 {
        let ifreq = ((ratio.log2() + 8.0) * IFREQ_STEPS_PER_OCTAVE).round();
        ifreq.clamp(0.0, 65535.0) as u16
    } else {
        0
    }
}

/// Decode ifreq units back to a linear frequency ratio.
#[inline]
pub fn ifreq_to_ratio(ifreq: u16) -> f64 {
    (ifreq as f64 / IFREQ_STEPS_PER_OCTAVE - 8.0).exp2()
}

/// Decode a u16 phase (turns) to radians.
#[inline]
pub fn phase_to_radians(phase: u16) -> f64 {
    phase as f64 * (TAU / 65536.0)
}

/// Encode radians as a u16 phase (turns), wrapping.
#[inline]
pub fn radians_to_phase(radians: f64) -> u16 {
    let turns = radians / TAU;
    let wrapped = turns - turns.floor();
    ((wrapped * 65536.0).round() as u32 & 0xffff) as u16
}

/// MIDI note number to frequency in Hz (equal temperament, A4 = 440 Hz).
#[inline]
pub fn note_to_freq(note: u8) -> f32 {
    440.0 * 2.0_f32.powf((note as f32 - 69.0) / 12.0)
}

/// MIDI velocity (0-127) to a linear gain factor.
///
/// `sensitivity_db` is the attenuation applied at velocity 0; velocity 127
/// yields unity gain.
#[inline]
pub fn velocity_gain(velocity: u8, sensitivity_db: f32) -> f32 {
    let v = (velocity.min(127) as f32) / 127.0;
    db_to_factor((-sensitivity_db * (1.0 - v)) as f64) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_idb_roundtrip() {
        for db in [-96.0, -40.0, -6.0, 0.0, 6.0, 20.0] {
            let idb = db_to_idb(db);
            assert_relative_eq!(idb_to_db(idb), db, epsilon = 1.0 / 64.0);
        }
    }

    #[test]
    fn test_idb_floor_constant() {
        assert_eq!(IDB_M96, db_to_idb(-96.0));
    }

    #[test]
    fn test_factor_codec() {
        assert_relative_eq!(idb_to_factor(db_to_idb(0.0)), 1.0, epsilon = 1e-3);
        assert_relative_eq!(idb_to_factor(db_to_idb(-20.0)), 0.1, epsilon = 1e-3);
        assert_eq!(factor_to_idb(0.0), 0);
    }

    #[test]
    fn test_delta_idb_scales() {
        let idb = db_to_idb(-12.0);
        let delta = factor_to_delta_idb(db_to_factor(-6.0));
        let shifted = (idb as i32 + delta).clamp(0, 65535) as u16;
        assert_relative_eq!(idb_to_db(shifted), -18.0, epsilon = 0.05);
    }

    #[test]
    fn test_ifreq_roundtrip() {
        for ratio in [0.5, 1.0, 1.5, 2.0, 3.99, 7.5] {
            let ifreq = ratio_to_ifreq(ratio);
            // 1/4096 octave resolution
            assert_relative_eq!(ifreq_to_ratio(ifreq), ratio, max_relative = 2e-4);
        }
        assert_eq!(ratio_to_ifreq(1.0), IFREQ_UNITY);
    }

    #[test]
    fn test_phase_codec() {
        assert_relative_eq!(phase_to_radians(0), 0.0);
        assert_relative_eq!(
            phase_to_radians(16384),
            std::f64::consts::FRAC_PI_2,
            epsilon = 1e-3
        );
        assert_eq!(radians_to_phase(TAU), 0);
    }

    #[test]
    fn test_note_to_freq() {
        assert_relative_eq!(note_to_freq(69), 440.0);
        assert_relative_eq!(note_to_freq(81), 880.0, epsilon = 1e-3);
        assert_relative_eq!(note_to_freq(57), 220.0, epsilon = 1e-3);
    }

    #[test]
    fn test_velocity_gain() {
        assert_relative_eq!(velocity_gain(127, 24.0), 1.0);
        assert!(velocity_gain(0, 24.0) < velocity_gain(64, 24.0));
        assert_relative_eq!(velocity_gain(0, 24.0), db_to_factor(-24.0) as f32);
    }
}
