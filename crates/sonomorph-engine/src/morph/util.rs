//! The two-source spectral morph primitive.
//!
//! Takes two [`AudioBlock`]s and an interpolation position and produces a
//! block that is perceptually "between" them: partials are paired by
//! frequency proximity (loudest first), paired partials interpolate, and
//! unpaired ones fade out toward the side where they have no counterpart.

use sonomorph_model::math::{self, IDB_M96};
use sonomorph_model::{AudioBlock, Partial};

/// Maximum relative frequency distance for two partials to pair up.
/// 5 percent is roughly 89 cents, just under a semitone.
const MATCH_TOLERANCE: f32 = 0.05;

#[derive(Debug, Clone, Copy)]
struct MagEntry {
    mag: u16,
    freq: u16,
    index: u32,
    is_left: bool,
}

/// Reusable scratch for [`morph`]. One per runtime module; after warmup
/// no call allocates.
#[derive(Debug, Default)]
pub struct MorphScratch {
    mags: Vec<MagEntry>,
    left_used: Vec<bool>,
    right_used: Vec<bool>,
    left_freq: Vec<f32>,
    right_freq: Vec<f32>,
}

/// One-sided magnitude interpolation in the idb domain.
///
/// The missing side is pinned to -96 dB so a partial present on only one
/// side fades to (near) silence instead of holding its level. Returns
/// the interpolated idb, or 0 when the result lands on the -96 dB floor.
#[inline]
fn interp_mag_one(interp: f64, left: Option<u16>, right: Option<u16>) -> u16 {
    let lmag = left.unwrap_or(0).max(IDB_M96);
    let rmag = right.unwrap_or(0).max(IDB_M96);
    let mag = ((1.0 - interp) * lmag as f64 + interp * rmag as f64).round() as u16;
    if mag == IDB_M96 {
        0
    } else {
        mag
    }
}

/// Same as [`interp_mag_one`] but interpolating linear amplitudes.
#[inline]
fn interp_mag_one_linear(interp: f64, left: Option<u16>, right: Option<u16>) -> u16 {
    let lf = left.map(math::idb_to_factor).unwrap_or(0.0);
    let rf = right.map(math::idb_to_factor).unwrap_or(0.0);
    math::factor_to_idb((1.0 - interp) * lf + interp * rf)
}

fn find_match(freq: f32, freqs: &[f32], used: &[bool]) -> Option<usize> {
    let bound = freq * MATCH_TOLERANCE;
    let mut best: Option<(usize, f32)> = None;
    for (i, &f) in freqs.iter().enumerate() {
        if used[i] {
            continue;
        }
        let diff = (f - freq).abs();
        if diff < bound && best.map_or(true, |(_, d)| diff < d) {
            best = Some((i, diff));
        }
    }
    best.map(|(i, _)| i)
}

/// Morph `left` and `right` into `out`.
///
/// `morphing` is in [-1, 1]; -1 reproduces `left`, +1 reproduces
/// `right` (up to quantization). A missing side is treated as silence,
/// so the present side fades with position. `db_linear` selects
/// dB-domain magnitude interpolation (the default voicing) over plain
/// linear amplitude blending.
///
/// Returns false when both sides are missing; `out` is then cleared and
/// the caller renders silence.
pub fn morph(
    out: &mut AudioBlock,
    left: Option<&AudioBlock>,
    right: Option<&AudioBlock>,
    morphing: f64,
    db_linear: bool,
    scratch: &mut MorphScratch,
) -> bool {
    let interp = ((morphing + 1.0) / 2.0).clamp(0.0, 1.0);
    out.clear();

    let (left, right) = match (left, right) {
        (None, None) => return false,
        (l, r) => (l, r),
    };
    let empty = AudioBlock::default();
    let left = left.unwrap_or(&empty);
    let right = right.unwrap_or(&empty);

    // Loudest partials claim their frequency match first.
    scratch.mags.clear();
    for (i, p) in left.partials.iter().enumerate() {
        scratch.mags.push(MagEntry {
            mag: p.mag,
            freq: p.freq,
            index: i as u32,
            is_left: true,
        });
    }
    for (i, p) in right.partials.iter().enumerate() {
        scratch.mags.push(MagEntry {
            mag: p.mag,
            freq: p.freq,
            index: i as u32,
            is_left: false,
        });
    }
    // frequency tie-break keeps the processing order independent of
    // which block is passed as left
    scratch
        .mags
        .sort_unstable_by(|a, b| b.mag.cmp(&a.mag).then(a.freq.cmp(&b.freq)));

    scratch.left_used.clear();
    scratch.left_used.resize(left.partials.len(), false);
    scratch.right_used.clear();
    scratch.right_used.resize(right.partials.len(), false);

    scratch.left_freq.clear();
    scratch
        .left_freq
        .extend(left.partials.iter().map(|p| p.freq_ratio() as f32));
    scratch.right_freq.clear();
    scratch
        .right_freq
        .extend(right.partials.iter().map(|p| p.freq_ratio() as f32));

    for entry in &scratch.mags {
        let i = entry.index as usize;
        let (this_used, other_used, this_freq, other_freq) = if entry.is_left {
            (
                &mut scratch.left_used,
                &mut scratch.right_used,
                &scratch.left_freq,
                &scratch.right_freq,
            )
        } else {
            (
                &mut scratch.right_used,
                &mut scratch.left_used,
                &scratch.right_freq,
                &scratch.left_freq,
            )
        };
        if this_used[i] {
            continue;
        }
        this_used[i] = true;

        match find_match(this_freq[i], other_freq, other_used) {
            Some(j) => {
                other_used[j] = true;
                let (li, ri) = if entry.is_left { (i, j) } else { (j, i) };
                out.partials
                    .push(morph_pair(&left.partials[li], &right.partials[ri], interp, db_linear));
            }
            None => {
                let (lmag, rmag) = if entry.is_left {
                    (Some(entry.mag), None)
                } else {
                    (None, Some(entry.mag))
                };
                let mag = if db_linear {
                    interp_mag_one(interp, lmag, rmag)
                } else {
                    interp_mag_one_linear(interp, lmag, rmag)
                };
                let src = if entry.is_left {
                    &left.partials[i]
                } else {
                    &right.partials[i]
                };
                out.partials.push(Partial {
                    freq: src.freq,
                    mag,
                    phase: src.phase,
                });
            }
        }
    }

    // Noise blends in the linear domain regardless of voicing.
    for band in 0..out.noise.len() {
        let lf = math::idb_to_factor(left.noise.get(band).copied().unwrap_or(0));
        let rf = math::idb_to_factor(right.noise.get(band).copied().unwrap_or(0));
        out.noise[band] = math::factor_to_idb((1.0 - interp) * lf + interp * rf);
    }

    out.sort_freqs();
    true
}

/// Interpolate a matched pair of partials.
///
/// The frequency leans toward the louder partial: the quieter side only
/// pulls the pitch in proportion to its relative amplitude, which keeps
/// a strong fundamental stable when a weak neighbor pairs with it.
fn morph_pair(left: &Partial, right: &Partial, interp: f64, db_linear: bool) -> Partial {
    let lfreq = left.freq_ratio();
    let rfreq = right.freq_ratio();
    let freq = if left.mag > right.mag {
        let mfact = right.mag_f() / left.mag_f();
        lfreq + mfact * interp * (rfreq - lfreq)
    } else {
        let mfact = left.mag_f() / right.mag_f();
        rfreq + mfact * (1.0 - interp) * (lfreq - rfreq)
    };

    let mag = if db_linear {
        let lmag = left.mag.max(IDB_M96) as f64;
        let rmag = right.mag.max(IDB_M96) as f64;
        ((1.0 - interp) * lmag + interp * rmag).round() as u16
    } else {
        math::factor_to_idb((1.0 - interp) * left.mag_f() + interp * right.mag_f())
    };

    let phase = if left.mag >= right.mag {
        left.phase
    } else {
        right.phase
    };

    Partial {
        freq: math::ratio_to_ifreq(freq),
        mag,
        phase,
    }
}
