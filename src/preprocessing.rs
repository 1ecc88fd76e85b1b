use crate::error::{PipelineError, Result};
use log::{debug, warn};
use sci_rs::signal::filter::design::{
    butter_dyn, DigitalFilter, FilterBandType, FilterOutputType, Sos, SosFormatFilter,
};
use sci_rs::signal::filter::sosfiltfilt_dyn;

/// Design a digital Butterworth filter in second-order sections.
fn butterworth_sos(
    order: usize,
    cutoffs_hz: Vec<f64>,
    band: FilterBandType,
    sample_rate: f64,
) -> Result<Vec<Sos<f64>>> {
    let nyquist = sample_rate / 2.0;
    if cutoffs_hz.iter().any(|&c| c <= 0.0 || c >= nyquist) {
        return Err(PipelineError::ComputationFailure(format!(
            "cutoff {:?} Hz outside (0, {}) for a {} Hz signal",
            cutoffs_hz, nyquist, sample_rate
        )));
    }
    debug!(
        "Butterworth order {} cutoffs {:?} Hz at fs {} Hz",
        order, cutoffs_hz, sample_rate
    );

    match butter_dyn(
        order,
        cutoffs_hz,
        Some(band),
        Some(false),
        Some(FilterOutputType::Sos),
        Some(sample_rate),
    ) {
        DigitalFilter::Sos(SosFormatFilter { sos }) => Ok(sos),
        _ => Err(PipelineError::ComputationFailure(
            "filter design did not return second-order sections".into(),
        )),
    }
}

/// Forward-backward filtering; the signal must be longer than the edge padding.
fn zero_phase(data: &[f64], sos: &[Sos<f64>]) -> Result<Vec<f64>> {
    let padlen = 3 * (2 * sos.len() + 1);
    if data.len() <= padlen {
        return Err(PipelineError::EmptySignal(format!(
            "{} samples is too short to filter (need more than {})",
            data.len(),
            padlen
        )));
    }
    Ok(sosfiltfilt_dyn(data.iter(), sos))
}

pub fn lowpass(data: &[f64], sample_rate: f64, cutoff_hz: f64, order: usize) -> Result<Vec<f64>> {
    let sos = butterworth_sos(order, vec![cutoff_hz], FilterBandType::Lowpass, sample_rate)?;
    zero_phase(data, &sos)
}

pub fn highpass(data: &[f64], sample_rate: f64, cutoff_hz: f64, order: usize) -> Result<Vec<f64>> {
    let sos = butterworth_sos(order, vec![cutoff_hz], FilterBandType::Highpass, sample_rate)?;
    zero_phase(data, &sos)
}

pub fn bandpass(
    data: &[f64],
    sample_rate: f64,
    low_hz: f64,
    high_hz: f64,
    order: usize,
) -> Result<Vec<f64>> {
    let sos = butterworth_sos(
        order,
        vec![low_hz, high_hz],
        FilterBandType::Bandpass,
        sample_rate,
    )?;
    zero_phase(data, &sos)
}

/// Clean raw electrodermal activity: 4th order 3 Hz low-pass.
pub fn clean_eda(signal: &[f64], sample_rate: f64) -> Result<Vec<f64>> {
    if signal.is_empty() {
        return Err(PipelineError::EmptySignal("EDA signal has no samples".into()));
    }
    // 3 Hz needs a Nyquist frequency above it
    if sample_rate <= 7.0 {
        warn!(
            "EDA sampled at {} Hz is too slow to low-pass at 3 Hz, skipping filtering",
            sample_rate
        );
        return Ok(signal.to_vec());
    }
    lowpass(signal, sample_rate, 3.0, 4)
}

/// Clean a photoplethysmogram: 3rd order 0.5-8 Hz band-pass.
pub fn clean_ppg(signal: &[f64], sample_rate: f64) -> Result<Vec<f64>> {
    if signal.is_empty() {
        return Err(PipelineError::EmptySignal("PPG signal has no samples".into()));
    }
    bandpass(signal, sample_rate, 0.5, 8.0, 3)
}

/// Centered moving average; the window shrinks at the edges.
pub fn rolling_mean(data: &[f64], size: usize) -> Vec<f64> {
    let half = size / 2;
    let mut prefix = Vec::with_capacity(data.len() + 1);
    prefix.push(0.0);
    for &x in data {
        prefix.push(prefix[prefix.len() - 1] + x);
    }

    (0..data.len())
        .map(|i| {
            let start = i.saturating_sub(half);
            let end = (i + half + 1).min(data.len());
            (prefix[end] - prefix[start]) / (end - start) as f64
        })
        .collect()
}

/// Centered running median; the window shrinks at the edges.
pub fn rolling_median(data: &[f64], size: usize) -> Vec<f64> {
    let half = size / 2;
    let mut window = Vec::with_capacity(size + 1);
    (0..data.len())
        .map(|i| {
            let start = i.saturating_sub(half);
            let end = (i + half + 1).min(data.len());
            window.clear();
            window.extend_from_slice(&data[start..end]);
            median(&mut window)
        })
        .collect()
}

/// NaN-propagating minimum, like numpy's `min`.
pub fn nan_min(values: &[f64]) -> f64 {
    values.iter().fold(f64::INFINITY, |acc, &v| {
        if acc.is_nan() || v.is_nan() {
            f64::NAN
        } else {
            acc.min(v)
        }
    })
}

/// NaN-propagating maximum, like numpy's `max`.
pub fn nan_max(values: &[f64]) -> f64 {
    values.iter().fold(f64::NEG_INFINITY, |acc, &v| {
        if acc.is_nan() || v.is_nan() {
            f64::NAN
        } else {
            acc.max(v)
        }
    })
}

pub fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sorts `values` in place.
fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() || values.iter().any(|v| v.is_nan()) {
        return f64::NAN;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DescriptiveStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    /// Population standard deviation
    pub std: f64,
}

pub fn describe(values: &[f64]) -> DescriptiveStats {
    let mean = mean(values);
    let variance = values
        .iter()
        .map(|&x| {
            let diff = x - mean;
            diff * diff
        })
        .sum::<f64>()
        / values.len() as f64;

    DescriptiveStats {
        min: nan_min(values),
        max: nan_max(values),
        mean,
        median: median(&mut values.to_vec()),
        std: variance.sqrt(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;

    #[test]
    fn describe_matches_numpy_conventions() {
        let stats = describe(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 4.0);
        assert_abs_diff_eq!(stats.mean, 2.5);
        assert_abs_diff_eq!(stats.median, 2.5);
        assert_abs_diff_eq!(stats.std, 1.118_033_988_749_895, epsilon = 1e-12);
    }

    #[test]
    fn nan_propagates_through_stats() {
        let stats = describe(&[1.0, f64::NAN, 3.0]);
        assert!(stats.min.is_nan());
        assert!(stats.max.is_nan());
        assert!(stats.mean.is_nan());
        assert!(stats.median.is_nan());
        assert!(describe(&[]).mean.is_nan());
    }

    #[test]
    fn rolling_windows_shrink_at_edges() {
        let data = [1.0, 2.0, 3.0, 4.0, 100.0];
        let means = rolling_mean(&data, 3);
        assert_abs_diff_eq!(means[0], 1.5);
        assert_abs_diff_eq!(means[2], 3.0);
        let medians = rolling_median(&data, 3);
        assert_eq!(medians, vec![1.5, 2.0, 3.0, 4.0, 52.0]);
    }

    #[test]
    fn lowpass_keeps_slow_drift_and_removes_fast_noise() {
        let fs = 15.0;
        let signal: Vec<f64> = (0..900)
            .map(|i| {
                let t = i as f64 / fs;
                2.0 + 0.5 * (2.0 * PI * 6.0 * t).sin()
            })
            .collect();
        let cleaned = clean_eda(&signal, fs).unwrap();
        assert_eq!(cleaned.len(), signal.len());
        for &v in &cleaned[100..800] {
            assert_abs_diff_eq!(v, 2.0, epsilon = 0.05);
        }
    }

    #[test]
    fn filters_reject_bad_cutoffs_and_short_input() {
        assert!(clean_ppg(&[1.0; 200], 10.0).is_err());
        assert!(matches!(
            lowpass(&[1.0; 5], 15.0, 3.0, 4),
            Err(PipelineError::EmptySignal(_))
        ));
    }
}
