// ============================================================
// Layer 5 — Confidence Calibration
// ============================================================
// Post-hoc correction of the next-title confidence.
//
//   frozen model ──validation pass──► (max_confidence, is_correct)
//                ──pool-adjacent violators──► monotone step function
//
// Pool-adjacent violators (isotonic regression):
//   sort samples by confidence, start with one block per distinct
//   confidence, and while a block's mean accuracy exceeds the next
//   block's, merge them. What is left is non-decreasing.
//
// Quality is measured with Expected Calibration Error over K
// equal-width bins:
//
//   ECE = Σ_b (n_b / N) · |avg_conf_b − avg_acc_b|
//
// The bar is calibrated ECE < 0.05. Missing it is logged at warn
// level and recorded in the report; it never fails the run.

use serde::{Deserialize, Serialize};

use crate::domain::error::{TrajectoryError, TrajectoryResult};
use crate::domain::traits::Persistable;

pub const CALIBRATOR_FORMAT_VERSION: u32 = 1;
pub const DEFAULT_ECE_THRESHOLD: f64 = 0.05;
pub const DEFAULT_BINS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceSample {
    pub confidence: f32,
    pub correct:    bool,
}

impl ConfidenceSample {
    fn target(&self) -> f64 {
        if self.correct { 1.0 } else { 0.0 }
    }
}

/// One constant piece of the fitted step function.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationStep {
    /// Smallest raw confidence pooled into this step.
    pub from:  f32,
    /// Largest raw confidence pooled into this step.
    pub to:    f32,
    pub value: f32,
}

/// Monotone map raw confidence → calibrated probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsotonicCalibrator {
    pub format_version: u32,
    /// Vocabulary size of the model this was fit for.
    pub vocab_size:     usize,
    pub fitted_on:      usize,
    pub steps:          Vec<CalibrationStep>,
}

impl Persistable for IsotonicCalibrator {}

struct Block {
    from:  f64,
    to:    f64,
    sum:   f64,
    count: f64,
}

impl Block {
    fn mean(&self) -> f64 {
        self.sum / self.count
    }
}

impl IsotonicCalibrator {
    pub fn fit(samples: &[ConfidenceSample], vocab_size: usize) -> TrajectoryResult<Self> {
        if samples.is_empty() {
            return Err(TrajectoryError::config(
                "calibration set",
                "no confidence samples to fit on (is the validation split empty?)",
            ));
        }
        if let Some(bad) = samples.iter().find(|s| !(0.0..=1.0).contains(&s.confidence)) {
            return Err(TrajectoryError::config(
                "calibration set",
                format!("confidence {} is outside [0, 1]", bad.confidence),
            ));
        }

        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.confidence.total_cmp(&b.confidence));

        let mut blocks: Vec<Block> = Vec::new();
        for s in &sorted {
            let x = s.confidence as f64;
            // equal confidences always share a block
            let tie = blocks.last().is_some_and(|b| b.to == x);
            if tie {
                if let Some(last) = blocks.last_mut() {
                    last.sum   += s.target();
                    last.count += 1.0;
                }
            } else {
                blocks.push(Block { from: x, to: x, sum: s.target(), count: 1.0 });
            }

            while blocks.len() >= 2 && blocks[blocks.len() - 2].mean() > blocks[blocks.len() - 1].mean() {
                if let (Some(top), Some(below)) = (blocks.pop(), blocks.last_mut()) {
                    below.to     = top.to;
                    below.sum   += top.sum;
                    below.count += top.count;
                }
            }
        }

        let steps = blocks
            .iter()
            .map(|b| CalibrationStep {
                from:  b.from as f32,
                to:    b.to as f32,
                value: b.mean() as f32,
            })
            .collect();

        Ok(Self {
            format_version: CALIBRATOR_FORMAT_VERSION,
            vocab_size,
            fitted_on: samples.len(),
            steps,
        })
    }

    /// Value of the last step starting at or below `confidence`;
    /// anything below the first step maps to the first step.
    pub fn calibrate(&self, confidence: f32) -> f32 {
        let idx = self.steps.partition_point(|s| s.from <= confidence);
        match idx.checked_sub(1).and_then(|i| self.steps.get(i)).or(self.steps.first()) {
            Some(step) => step.value,
            None       => confidence,
        }
    }

    pub fn apply(&self, samples: &[ConfidenceSample]) -> Vec<ConfidenceSample> {
        samples
            .iter()
            .map(|s| ConfidenceSample { confidence: self.calibrate(s.confidence), ..*s })
            .collect()
    }

    /// Load and check the artifact against the vocabulary in use.
    pub fn load_for(path: impl AsRef<std::path::Path>, vocab_size: usize) -> TrajectoryResult<Self> {
        let path = path.as_ref();
        let cal  = <Self as Persistable>::load(path)?;
        let name = path.display().to_string();
        if cal.format_version != CALIBRATOR_FORMAT_VERSION {
            return Err(TrajectoryError::config(
                name,
                format!("unsupported calibrator format_version {}", cal.format_version),
            ));
        }
        if cal.steps.is_empty() {
            return Err(TrajectoryError::config(name, "calibrator has no steps"));
        }
        if cal.vocab_size != vocab_size {
            return Err(TrajectoryError::VocabularyMismatch {
                artifact: name,
                expected: cal.vocab_size,
                actual:   vocab_size,
            });
        }
        Ok(cal)
    }
}

// ─── Metrics ──────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReliabilityBin {
    pub lower:      f64,
    pub upper:      f64,
    pub count:      usize,
    pub confidence: f64,
    pub accuracy:   f64,
}

pub fn bin_index(confidence: f32, bins: usize) -> usize {
    ((confidence.max(0.0) as f64 * bins as f64) as usize).min(bins - 1)
}

pub fn reliability(samples: &[ConfidenceSample], bins: usize) -> Vec<ReliabilityBin> {
    let bins = bins.max(1);
    let mut conf_sum = vec![0.0f64; bins];
    let mut hits     = vec![0.0f64; bins];
    let mut counts   = vec![0usize; bins];

    for s in samples {
        let b = bin_index(s.confidence, bins);
        conf_sum[b] += s.confidence as f64;
        hits[b]     += s.target();
        counts[b]   += 1;
    }

    (0..bins)
        .map(|b| {
            let n = counts[b].max(1) as f64;
            ReliabilityBin {
                lower:      b as f64 / bins as f64,
                upper:      (b + 1) as f64 / bins as f64,
                count:      counts[b],
                confidence: conf_sum[b] / n,
                accuracy:   hits[b] / n,
            }
        })
        .collect()
}

/// Expected Calibration Error; 0 for an empty set.
pub fn expected_calibration_error(samples: &[ConfidenceSample], bins: usize) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let total = samples.len() as f64;
    reliability(samples, bins)
        .iter()
        .map(|b| (b.count as f64 / total) * (b.confidence - b.accuracy).abs())
        .sum()
}

pub fn brier_score(samples: &[ConfidenceSample]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples
        .iter()
        .map(|s| (s.confidence as f64 - s.target()).powi(2))
        .sum::<f64>()
        / samples.len() as f64
}

// ─── Report ───────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitCalibration {
    pub samples:      usize,
    pub ece_before:   f64,
    pub ece_after:    f64,
    pub brier_before: f64,
    pub brier_after:  f64,
    pub reliability:  Vec<ReliabilityBin>,
}

impl SplitCalibration {
    pub fn measure(cal: &IsotonicCalibrator, raw: &[ConfidenceSample], bins: usize) -> Self {
        let calibrated = cal.apply(raw);
        Self {
            samples:      raw.len(),
            ece_before:   expected_calibration_error(raw, bins),
            ece_after:    expected_calibration_error(&calibrated, bins),
            brier_before: brier_score(raw),
            brier_after:  brier_score(&calibrated),
            reliability:  reliability(&calibrated, bins),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptanceSplit {
    Validation,
    Test,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub bins:             usize,
    pub ece_threshold:    f64,
    pub validation:       SplitCalibration,
    pub test:             Option<SplitCalibration>,
    pub judged_on:        AcceptanceSplit,
    /// False is the calibration quality warning.
    pub meets_bar:        bool,
}

impl Persistable for CalibrationReport {}

impl CalibrationReport {
    pub fn assess(
        cal:        &IsotonicCalibrator,
        validation: &[ConfidenceSample],
        test:       &[ConfidenceSample],
        bins:       usize,
        threshold:  f64,
    ) -> Self {
        let validation = SplitCalibration::measure(cal, validation, bins);
        let test       = (!test.is_empty()).then(|| SplitCalibration::measure(cal, test, bins));

        let (judged_on, ece) = match &test {
            Some(t) => (AcceptanceSplit::Test, t.ece_after),
            None    => (AcceptanceSplit::Validation, validation.ece_after),
        };
        let meets_bar = ece < threshold;

        if meets_bar {
            tracing::info!("Calibrated ECE {:.4} < {:.2} on {:?} split", ece, threshold, judged_on);
        } else {
            tracing::warn!(
                "Calibration quality warning: calibrated ECE {:.4} does not meet the {:.2} bar on {:?} split",
                ece, threshold, judged_on,
            );
        }

        Self {
            bins,
            ece_threshold: threshold,
            validation,
            test,
            judged_on,
            meets_bar,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(confidence: f32, correct: bool) -> ConfidenceSample {
        ConfidenceSample { confidence, correct }
    }

    /// Overconfident model: says 0.9 but is right half the time.
    fn overconfident() -> Vec<ConfidenceSample> {
        let mut v = Vec::new();
        for i in 0..100 {
            v.push(s(0.9, i % 2 == 0));
            v.push(s(0.7, i % 4 == 0));
            v.push(s(0.3, i % 10 == 0));
        }
        v
    }

    #[test]
    fn test_fit_is_monotone() {
        let samples = vec![
            s(0.1, true), s(0.2, false), s(0.3, true), s(0.4, false),
            s(0.5, false), s(0.6, true), s(0.7, true), s(0.8, false), s(0.9, true),
        ];
        let cal = IsotonicCalibrator::fit(&samples, 5).unwrap();
        for w in cal.steps.windows(2) {
            assert!(w[0].value <= w[1].value);
            assert!(w[0].to < w[1].from);
        }
        let mut prev = 0.0;
        for i in 0..=100 {
            let c = cal.calibrate(i as f32 / 100.0);
            assert!(c >= prev);
            prev = c;
        }
    }

    #[test]
    fn test_worked_example_order_is_kept() {
        let cal = IsotonicCalibrator::fit(&overconfident(), 5).unwrap();
        assert!(cal.calibrate(0.9) >= cal.calibrate(0.7));
        assert!((cal.calibrate(0.9) - 0.5).abs() < 1e-6);
        assert!((cal.calibrate(0.7) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_violators_are_pooled() {
        // accuracy drops from 1.0 at 0.4 to 0.0 at 0.6 → one pooled block
        let cal = IsotonicCalibrator::fit(&[s(0.4, true), s(0.6, false)], 3).unwrap();
        assert_eq!(cal.steps.len(), 1);
        assert!((cal.steps[0].value - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_calibration_reduces_ece() {
        let raw = overconfident();
        let cal = IsotonicCalibrator::fit(&raw, 5).unwrap();
        let before = expected_calibration_error(&raw, DEFAULT_BINS);
        let after  = expected_calibration_error(&cal.apply(&raw), DEFAULT_BINS);
        assert!(before > 0.2);
        assert!(after < 1e-6);
    }

    #[test]
    fn test_ece_bounds() {
        assert_eq!(expected_calibration_error(&[], 10), 0.0);
        let worst = vec![s(1.0, false); 20];
        assert!((expected_calibration_error(&worst, 10) - 1.0).abs() < 1e-9);

        // 0.75 confidence, 3 of 4 correct: perfectly calibrated
        let perfect = vec![s(0.75, true), s(0.75, true), s(0.75, true), s(0.75, false)];
        assert!(expected_calibration_error(&perfect, 10).abs() < 1e-9);
    }

    #[test]
    fn test_top_confidence_lands_in_last_bin() {
        assert_eq!(bin_index(1.0, 10), 9);
        assert_eq!(bin_index(0.0, 10), 0);
        assert_eq!(bin_index(0.25, 4), 1);
    }

    #[test]
    fn test_brier() {
        assert_eq!(brier_score(&[s(1.0, true), s(0.0, false)]), 0.0);
        assert!((brier_score(&[s(0.5, true)]) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_report_flags_missed_bar() {
        let raw = overconfident();
        // identity-ish calibrator fit on perfectly reliable data leaves the overconfidence
        let cal = IsotonicCalibrator::fit(&[s(0.3, false), s(0.7, true), s(0.9, true)], 5).unwrap();
        let report = CalibrationReport::assess(&cal, &raw, &[], DEFAULT_BINS, DEFAULT_ECE_THRESHOLD);
        assert_eq!(report.judged_on, AcceptanceSplit::Validation);
        assert!(!report.meets_bar);

        let good = IsotonicCalibrator::fit(&raw, 5).unwrap();
        let report = CalibrationReport::assess(&good, &raw, &raw, DEFAULT_BINS, DEFAULT_ECE_THRESHOLD);
        assert_eq!(report.judged_on, AcceptanceSplit::Test);
        assert!(report.meets_bar);
    }

    #[test]
    fn test_fit_rejects_bad_input() {
        assert!(IsotonicCalibrator::fit(&[], 5).is_err());
        assert!(IsotonicCalibrator::fit(&[s(1.5, true)], 5).is_err());
    }

    #[test]
    fn test_save_and_load_checks_vocab() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibrator.json");
        let cal  = IsotonicCalibrator::fit(&overconfident(), 7).unwrap();
        cal.save(&path).unwrap();

        assert_eq!(IsotonicCalibrator::load_for(&path, 7).unwrap(), cal);
        assert!(matches!(
            IsotonicCalibrator::load_for(&path, 8),
            Err(TrajectoryError::VocabularyMismatch { expected: 7, actual: 8, .. })
        ));
    }
}
