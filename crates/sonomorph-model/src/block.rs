//! One analysis frame of spectral data.

use crate::math;

/// Number of noise envelope bands (bark/critical-band resolution).
pub const NOISE_BANDS: usize = 32;

/// One sinusoidal component of a spectral frame.
///
/// `freq` is a log-domain ratio to the sample's fundamental (see
/// [`math::ifreq_to_ratio`]), `mag` is a fixed-point dB magnitude and
/// `phase` is the start phase in turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Partial {
    pub freq: u16,
    pub mag: u16,
    pub phase: u16,
}

impl Partial {
    /// Frequency as a linear ratio to the fundamental.
    #[inline]
    pub fn freq_ratio(&self) -> f64 {
        math::ifreq_to_ratio(self.freq)
    }

    /// Magnitude as a linear factor.
    #[inline]
    pub fn mag_f(&self) -> f64 {
        math::idb_to_factor(self.mag)
    }

    /// Start phase in radians.
    #[inline]
    pub fn phase_f(&self) -> f64 {
        math::phase_to_radians(self.phase)
    }
}

/// Block of audio data in the parametric spectral format.
///
/// One analysis frame: sine partials sorted by frequency ascending plus a
/// fixed-size noise envelope for everything that remained after
/// subtracting the sine components. Immutable once produced by the
/// offline encoder; read-only at synthesis time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioBlock {
    /// Sine partials, sorted by `freq` ascending.
    pub partials: Vec<Partial>,
    /// Noise envelope, [`NOISE_BANDS`] fixed-point dB values.
    pub noise: Vec<u16>,
}

impl AudioBlock {
    /// Create an empty block with a silent noise envelope and partial
    /// capacity reserved.
    pub fn with_capacity(partials: usize) -> Self {
        Self {
            partials: Vec::with_capacity(partials),
            noise: vec![0; NOISE_BANDS],
        }
    }

    #[inline]
    pub fn n_partials(&self) -> usize {
        self.partials.len()
    }

    /// Frequency of partial `i` as a linear ratio to the fundamental.
    #[inline]
    pub fn freq_ratio(&self, i: usize) -> f64 {
        math::ifreq_to_ratio(self.partials[i].freq)
    }

    /// Magnitude of partial `i` as a linear factor.
    #[inline]
    pub fn mag_f(&self, i: usize) -> f64 {
        math::idb_to_factor(self.partials[i].mag)
    }

    /// Start phase of partial `i` in radians.
    #[inline]
    pub fn phase_f(&self, i: usize) -> f64 {
        math::phase_to_radians(self.partials[i].phase)
    }

    /// Noise band `i` as a linear factor.
    #[inline]
    pub fn noise_f(&self, i: usize) -> f64 {
        math::idb_to_factor(self.noise[i])
    }

    /// Restore the sorted-frequency invariant after mutation.
    ///
    /// In-place and allocation-free; magnitudes and phases travel with
    /// their partial.
    pub fn sort_freqs(&mut self) {
        self.partials.sort_unstable_by_key(|p| p.freq);
    }

    /// Whether partial frequencies are non-decreasing.
    pub fn freqs_sorted(&self) -> bool {
        self.partials.windows(2).all(|w| w[0].freq <= w[1].freq)
    }

    /// Remove all partials and silence the noise envelope, keeping
    /// allocations.
    pub fn clear(&mut self) {
        self.partials.clear();
        if self.noise.len() != NOISE_BANDS {
            self.noise.resize(NOISE_BANDS, 0);
        }
        self.noise.fill(0);
    }

    /// Copy `other` into `self`, reusing existing allocations.
    pub fn assign(&mut self, other: &AudioBlock) {
        self.partials.clear();
        self.partials.extend_from_slice(&other.partials);
        self.noise.clear();
        self.noise.extend_from_slice(&other.noise);
    }
}
