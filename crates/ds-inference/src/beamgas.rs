//! Residual beam-gas background subtraction.
//!
//! Beam-gas interactions are measured through asymmetric trigger masks
//! (A-side beam only, C-side beam only, empty-empty) and statistically
//! subtracted from the beam-beam rate vector:
//!
//! `y_i = round(B_i - a A_i - c C_i + 2 e E_i)`, clamped at zero.
//!
//! The `+2e` sign on the empty-empty term corrects the double counting of
//! the empty-bunch background in the two single-beam masks
//! (inclusion-exclusion over the two background sources).

use ds_core::{Error, Result};

/// Trigger-mask scale factors, externally supplied and constant per run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerMaskScales {
    /// A-side beam mask scale.
    pub a_side: f64,
    /// C-side beam mask scale.
    pub c_side: f64,
    /// Empty-empty mask scale.
    pub empty: f64,
}

impl TriggerMaskScales {
    /// Scales that disable the correction entirely.
    pub const OFF: TriggerMaskScales = TriggerMaskScales { a_side: 0.0, c_side: 0.0, empty: 0.0 };
}

/// Beam-gas corrected rates plus the clamping QA statistic.
#[derive(Debug, Clone)]
pub struct CorrectedCounts {
    /// Corrected, rounded, non-negative event rates.
    pub counts: Vec<f64>,
    /// Number of bins clamped at the physical zero boundary. A large value
    /// signals mis-scaled masks and is worth inspecting.
    pub clamped_bins: usize,
}

/// Subtract the scaled background masks from the beam-beam rate vector.
///
/// All four vectors must share the same length (one entry per combinatorial
/// index); a mismatch is a configuration error.
pub fn subtract(
    beam_beam: &[f64],
    a_side: &[f64],
    c_side: &[f64],
    empty: &[f64],
    scales: &TriggerMaskScales,
) -> Result<CorrectedCounts> {
    let n = beam_beam.len();
    if a_side.len() != n || c_side.len() != n || empty.len() != n {
        return Err(Error::Config(format!(
            "beam-gas mask length mismatch: B={}, A={}, C={}, E={}",
            n,
            a_side.len(),
            c_side.len(),
            empty.len()
        )));
    }

    let mut counts = Vec::with_capacity(n);
    let mut clamped_bins = 0;
    for i in 0..n {
        let y = (beam_beam[i] - scales.a_side * a_side[i] - scales.c_side * c_side[i]
            + 2.0 * scales.empty * empty[i])
            .round();
        if y < 0.0 {
            clamped_bins += 1;
            counts.push(0.0);
        } else {
            counts.push(y);
        }
    }

    if clamped_bins > 0 {
        log::warn!("beam-gas subtraction clamped {clamped_bins} bins at zero");
    }
    Ok(CorrectedCounts { counts, clamped_bins })
}

/// Per-combination subtraction summary, one row per combinatorial index.
#[derive(Debug, Clone)]
pub struct MaskBinSummary {
    /// Combinatorial index.
    pub index: usize,
    /// Corrected rate.
    pub corrected: f64,
    /// Raw beam-beam rate.
    pub beam_beam: f64,
    /// Ratio corrected/raw (zero for an empty raw bin).
    pub ratio: f64,
}

/// Tabulate the subtraction bin by bin for QA reports.
pub fn mask_statistics(
    beam_beam: &[f64],
    a_side: &[f64],
    c_side: &[f64],
    empty: &[f64],
    scales: &TriggerMaskScales,
) -> Result<Vec<MaskBinSummary>> {
    let corrected = subtract(beam_beam, a_side, c_side, empty, scales)?;
    Ok(corrected
        .counts
        .iter()
        .zip(beam_beam)
        .enumerate()
        .map(|(index, (&cor, &raw))| MaskBinSummary {
            index,
            corrected: cor,
            beam_beam: raw,
            ratio: if raw.abs() > ds_comb::EPS { cor / raw } else { 0.0 },
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_background_is_identity_up_to_rounding() {
        let x = vec![10.2, 0.0, 5.7, 123.0];
        let zeros = vec![0.0; 4];
        let scales = TriggerMaskScales { a_side: 3.0, c_side: 2.0, empty: 10.0 };
        let out = subtract(&x, &zeros, &zeros, &zeros, &scales).unwrap();
        assert_eq!(out.counts, vec![10.0, 0.0, 6.0, 123.0]);
        assert_eq!(out.clamped_bins, 0);
    }

    #[test]
    fn never_negative_and_counts_clamps() {
        let x = vec![5.0, 5.0];
        let a = vec![10.0, 0.0];
        let zeros = vec![0.0; 2];
        let scales = TriggerMaskScales { a_side: 1.0, c_side: 0.0, empty: 0.0 };
        let out = subtract(&x, &a, &zeros, &zeros, &scales).unwrap();
        assert!(out.counts.iter().all(|&y| y >= 0.0));
        assert_eq!(out.clamped_bins, 1);
    }

    #[test]
    fn empty_empty_enters_with_positive_double_weight() {
        let x = vec![100.0];
        let a = vec![10.0];
        let c = vec![10.0];
        let e = vec![5.0];
        let scales = TriggerMaskScales { a_side: 1.0, c_side: 1.0, empty: 1.0 };
        let out = subtract(&x, &a, &c, &e, &scales).unwrap();
        // 100 - 10 - 10 + 2*5 = 90
        assert_eq!(out.counts[0], 90.0);
    }

    #[test]
    fn length_mismatch_is_config_error() {
        let scales = TriggerMaskScales::OFF;
        let r = subtract(&[1.0, 2.0], &[1.0], &[1.0, 2.0], &[1.0, 2.0], &scales);
        assert!(r.is_err());
    }
}
