//! Pitch glide between consecutive notes.

/// Log-frequency glide state.
///
/// Frequency moves at a constant rate in log2 space, so a glide sounds
/// like a straight line in pitch regardless of direction or interval.
#[derive(Debug, Clone)]
pub struct Portamento {
    current: f64,
    target: f64,
    step: f64,
}

impl Portamento {
    pub fn new() -> Self {
        Self {
            current: 0.0,
            target: 0.0,
            step: 0.0,
        }
    }

    /// Jump immediately to `freq` (first note, or portamento disabled).
    pub fn retrigger(&mut self, freq: f32) {
        let l = (freq.max(1.0) as f64).log2();
        self.current = l;
        self.target = l;
        self.step = 0.0;
    }

    /// Start a glide from the current position to `freq` over
    /// `glide_ms`.
    pub fn glide_to(&mut self, freq: f32, glide_ms: f64, mix_freq: f32) {
        self.target = (freq.max(1.0) as f64).log2();
        let samples = (glide_ms / 1000.0 * mix_freq as f64).max(1.0);
        self.step = (self.target - self.current) / samples;
    }

    /// Current frequency in Hz.
    #[inline]
    pub fn freq(&self) -> f32 {
        self.current.exp2() as f32
    }

    pub fn active(&self) -> bool {
        self.current != self.target
    }

    /// Advance by `n` samples and return the frequency afterwards.
    pub fn advance(&mut self, n: usize) -> f32 {
        if self.current != self.target {
            self.current += self.step * n as f64;
            // clamp on overshoot
            if (self.step > 0.0 && self.current > self.target)
                || (self.step < 0.0 && self.current < self.target)
            {
                self.current = self.target;
            }
        }
        self.freq()
    }
}

impl Default for Portamento {
    fn default() -> Self {
        Self::new()
    }
}
