use crate::config::{PpgConfig, SubjectMetadata};
use crate::error::{PipelineError, Result};
use crate::preprocessing::{self, rolling_mean};
use crate::{data_loading, output, plotting};
use chrono::{DateTime, Duration, FixedOffset, TimeZone};
use log::{debug, trace, warn};
use rustfft::{num_complex::Complex, FftPlanner};
use std::f64::consts::PI;
use std::path::{Path, PathBuf};

/// Rate the NN series is resampled to before spectral estimation (Hz)
const NNI_RESAMPLE_HZ: f64 = 4.0;
const WELCH_SEGMENT: usize = 256;
const WELCH_NFFT: usize = 4096;

const VLF_BAND: (f64, f64) = (0.0, 0.04);
const LF_BAND: (f64, f64) = (0.04, 0.15);
const HF_BAND: (f64, f64) = (0.15, 0.4);

/// Create a periodic Hamming window of the specified size
fn create_hamming_window(size: usize) -> Vec<f64> {
    (0..size)
        .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f64 / size as f64).cos())
        .collect()
}

/// Detect systolic peaks in a cleaned PPG using Elgendi's two moving averages.
///
/// The signal is clipped at zero and squared; samples where the short (0.111 s)
/// average exceeds the long (0.667 s) average plus 2% of the mean energy form
/// blocks of interest. Blocks narrower than the short window are ignored, the
/// highest local maximum of each remaining block is a beat, and beats closer
/// than 0.3 s to the previous one are dropped.
pub fn find_ppg_peaks(signal: &[f64], sample_rate: f64) -> Vec<usize> {
    if signal.len() < 3 {
        return Vec::new();
    }

    let squared: Vec<f64> = signal
        .iter()
        .map(|&x| {
            let clipped = x.max(0.0);
            clipped * clipped
        })
        .collect();

    let peak_window = ((0.111 * sample_rate).round() as usize).max(1);
    let beat_window = ((0.667 * sample_rate).round() as usize).max(1);
    let ma_peak = rolling_mean(&squared, peak_window);
    let ma_beat = rolling_mean(&squared, beat_window);
    let offset = 0.02 * preprocessing::mean(&squared);

    let waves: Vec<bool> = ma_peak
        .iter()
        .zip(&ma_beat)
        .map(|(&p, &b)| p > b + offset)
        .collect();

    let mut beginnings = Vec::new();
    let mut ends = Vec::new();
    for i in 0..waves.len() - 1 {
        match (waves[i], waves[i + 1]) {
            (false, true) => beginnings.push(i),
            (true, false) => ends.push(i),
            _ => {}
        }
    }
    if beginnings.is_empty() || ends.is_empty() {
        return Vec::new();
    }
    // Pair each rising edge with the falling edge that follows it
    if ends[0] < beginnings[0] {
        ends.remove(0);
    }
    if let (Some(&last_beg), Some(&last_end)) = (beginnings.last(), ends.last()) {
        if last_beg > last_end {
            beginnings.pop();
        }
    }

    let min_delay = (0.3 * sample_rate).round() as usize;
    let mut peaks = vec![0usize];

    for (&beg, &end) in beginnings.iter().zip(ends.iter()) {
        if end - beg < peak_window {
            continue;
        }
        let block = &signal[beg..end];
        let best = (1..block.len().saturating_sub(1))
            .filter(|&j| block[j - 1] < block[j] && block[j] >= block[j + 1])
            .max_by(|&a, &b| block[a].total_cmp(&block[b]));

        if let Some(j) = best {
            let peak = beg + j;
            if peak - peaks[peaks.len() - 1] > min_delay {
                peaks.push(peak);
            }
        }
    }

    peaks.remove(0);
    trace!("Elgendi: {} blocks, {} peaks", beginnings.len(), peaks.len());
    peaks
}

/// Successive peak distances in milliseconds
pub fn nn_intervals(peaks: &[usize], sample_rate: f64) -> Vec<f64> {
    peaks
        .windows(2)
        .map(|w| (w[1] - w[0]) as f64 * 1000.0 / sample_rate)
        .collect()
}

/// One-sided power spectral density by Welch's method.
///
/// Hamming-windowed segments of `segment_len` samples (shortened to the
/// signal length) with 50% overlap, each detrended by its mean and zero padded
/// to `nfft` points. Returns `(frequencies, density)`.
pub fn welch_psd(signal: &[f64], sample_rate: f64, segment_len: usize, nfft: usize) -> (Vec<f64>, Vec<f64>) {
    let segment_len = segment_len.min(signal.len());
    if segment_len == 0 {
        return (Vec::new(), Vec::new());
    }
    let nfft = nfft.max(segment_len);
    let step = segment_len - segment_len / 2;

    let window = create_hamming_window(segment_len);
    let scale = 1.0 / (sample_rate * window.iter().map(|w| w * w).sum::<f64>());

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(nfft);

    let mut psd = vec![0.0; nfft / 2 + 1];
    let mut num_segments = 0;
    let mut start = 0;
    while start + segment_len <= signal.len() {
        let segment = &signal[start..start + segment_len];
        let segment_mean = preprocessing::mean(segment);

        let mut buffer = vec![Complex::new(0.0, 0.0); nfft];
        for (j, &x) in segment.iter().enumerate() {
            buffer[j] = Complex::new((x - segment_mean) * window[j], 0.0);
        }
        fft.process(&mut buffer);

        for (j, p) in psd.iter_mut().enumerate() {
            *p += buffer[j].norm_sqr() * scale;
        }
        num_segments += 1;
        start += step;
    }

    let last = psd.len() - 1;
    for (j, p) in psd.iter_mut().enumerate() {
        *p /= num_segments as f64;
        // Fold negative frequencies in, except DC and an even-length Nyquist bin
        if j != 0 && !(j == last && nfft % 2 == 0) {
            *p *= 2.0;
        }
    }

    let freqs = (0..psd.len())
        .map(|j| j as f64 * sample_rate / nfft as f64)
        .collect();
    (freqs, psd)
}

fn band_power(freqs: &[f64], psd: &[f64], band: (f64, f64)) -> f64 {
    let df = if freqs.len() > 1 { freqs[1] - freqs[0] } else { 0.0 };
    freqs
        .iter()
        .zip(psd)
        .filter(|(&f, _)| f >= band.0 && f < band.1)
        .map(|(_, &p)| p)
        .sum::<f64>()
        * df
}

/// Frequency-domain HRV of one window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyDomain {
    pub vlf_abs: f64,
    pub lf_abs: f64,
    pub hf_abs: f64,
    /// LF share of LF+HF power, percent
    pub lf_norm: f64,
    /// HF share of LF+HF power, percent
    pub hf_norm: f64,
    pub lf_hf_ratio: f64,
    pub total: f64,
}

impl FrequencyDomain {
    fn undefined() -> Self {
        Self {
            vlf_abs: f64::NAN,
            lf_abs: f64::NAN,
            hf_abs: f64::NAN,
            lf_norm: f64::NAN,
            hf_norm: f64::NAN,
            lf_hf_ratio: f64::NAN,
            total: f64::NAN,
        }
    }
}

/// Linearly resample NN intervals onto an even grid starting at the first beat.
fn resample_nni(nni: &[f64], rate_hz: f64) -> Vec<f64> {
    // beat times in ms, relative to the first interval
    let mut times = Vec::with_capacity(nni.len());
    let mut t = 0.0;
    for (i, &rr) in nni.iter().enumerate() {
        if i > 0 {
            t += rr;
        }
        times.push(t);
    }

    let step_ms = 1000.0 / rate_hz;
    let last = *times.last().unwrap_or(&0.0);
    let num_samples = (last / step_ms).ceil() as usize;

    let mut resampled = Vec::with_capacity(num_samples);
    let mut j = 0;
    for k in 0..num_samples {
        let tk = k as f64 * step_ms;
        while j + 1 < times.len() - 1 && times[j + 1] < tk {
            j += 1;
        }
        let (t1, t2) = (times[j], times[j + 1]);
        let alpha = (tk - t1) / (t2 - t1);
        resampled.push(nni[j] + alpha * (nni[j + 1] - nni[j]));
    }
    resampled
}

/// Welch-based frequency-domain HRV for a series of NN intervals (ms).
pub fn frequency_domain(nni: &[f64]) -> FrequencyDomain {
    if nni.len() < 2 {
        return FrequencyDomain::undefined();
    }
    let mut series = resample_nni(nni, NNI_RESAMPLE_HZ);
    if series.len() < 2 {
        return FrequencyDomain::undefined();
    }
    let series_mean = preprocessing::mean(&series);
    for x in &mut series {
        *x -= series_mean;
    }

    let (freqs, psd) = welch_psd(&series, NNI_RESAMPLE_HZ, WELCH_SEGMENT, WELCH_NFFT);
    let vlf_abs = band_power(&freqs, &psd, VLF_BAND);
    let lf_abs = band_power(&freqs, &psd, LF_BAND);
    let hf_abs = band_power(&freqs, &psd, HF_BAND);

    let lf_hf = lf_abs + hf_abs;
    FrequencyDomain {
        vlf_abs,
        lf_abs,
        hf_abs,
        lf_norm: lf_abs / lf_hf * 100.0,
        hf_norm: hf_abs / lf_hf * 100.0,
        lf_hf_ratio: lf_abs / hf_abs,
        total: vlf_abs + lf_abs + hf_abs,
    }
}

/// Start indices of full windows: `floor((n - window) / step)` of them, `step` apart.
pub fn window_starts(n: usize, window_samples: usize, step: usize) -> Vec<usize> {
    if step == 0 || n <= window_samples {
        return Vec::new();
    }
    let count = (n - window_samples) / step;
    (0..count).map(|k| k * step).collect()
}

/// Aggregate HRV record for one window start (or one second after resampling).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HrvWindow {
    pub timestamp: DateTime<FixedOffset>,
    pub lf_hf_ratio: f64,
    pub lf_n: f64,
    pub hf_n: f64,
    pub lf_abs: f64,
    pub hf_abs: f64,
    pub total: f64,
}

/// Slide a window over the cleaned PPG, one second of samples per step.
/// Windows without any NN interval produce no record.
pub fn sliding_hrv(
    clean: &[f64],
    timestamps: &[DateTime<FixedOffset>],
    window_samples: usize,
    sample_rate: usize,
) -> Vec<HrvWindow> {
    let fs = sample_rate as f64;
    let starts = window_starts(clean.len(), window_samples, sample_rate);
    debug!(
        "{} windows of {} samples over {} samples",
        starts.len(),
        window_samples,
        clean.len()
    );

    let mut records = Vec::with_capacity(starts.len());
    for start in starts {
        let end = start + window_samples;
        let start_time = timestamps[start];

        if start % (sample_rate * 30) == 0 {
            if let Some(end_time) = timestamps.get(end) {
                println!("Start time: {} - End time: {}", start_time, end_time);
            }
        }

        let peaks = find_ppg_peaks(&clean[start..end], fs);
        let nni = nn_intervals(&peaks, fs);
        if nni.is_empty() {
            warn!("No beat intervals in window starting {}", start_time);
            continue;
        }

        let fd = frequency_domain(&nni);
        trace!("{}: {} beats, {:?}", start_time, peaks.len(), fd);
        records.push(HrvWindow {
            timestamp: start_time,
            lf_hf_ratio: fd.lf_hf_ratio,
            lf_n: fd.lf_norm,
            hf_n: fd.hf_norm,
            lf_abs: fd.lf_abs,
            hf_abs: fd.hf_abs,
            total: fd.total,
        });
    }
    records
}

fn max_skip_nan(acc: f64, v: f64) -> f64 {
    if v.is_nan() {
        acc
    } else if acc.is_nan() {
        v
    } else {
        acc.max(v)
    }
}

/// Bin records into whole seconds and keep the per-column maximum.
/// Seconds with no record between the first and last bin are all-NaN rows.
pub fn resample_max_1s(records: &[HrvWindow]) -> Vec<HrvWindow> {
    let Some(first) = records.first() else {
        return Vec::new();
    };
    let offset = *first.timestamp.offset();

    let first_sec = records.iter().map(|r| r.timestamp.timestamp()).min().unwrap_or(0);
    let last_sec = records.iter().map(|r| r.timestamp.timestamp()).max().unwrap_or(0);

    let mut bins: Vec<HrvWindow> = (first_sec..=last_sec)
        .filter_map(|sec| DateTime::from_timestamp(sec, 0))
        .map(|t| HrvWindow {
            timestamp: t.with_timezone(&offset),
            lf_hf_ratio: f64::NAN,
            lf_n: f64::NAN,
            hf_n: f64::NAN,
            lf_abs: f64::NAN,
            hf_abs: f64::NAN,
            total: f64::NAN,
        })
        .collect();

    for r in records {
        let bin = &mut bins[(r.timestamp.timestamp() - first_sec) as usize];
        bin.lf_hf_ratio = max_skip_nan(bin.lf_hf_ratio, r.lf_hf_ratio);
        bin.lf_n = max_skip_nan(bin.lf_n, r.lf_n);
        bin.hf_n = max_skip_nan(bin.hf_n, r.hf_n);
        bin.lf_abs = max_skip_nan(bin.lf_abs, r.lf_abs);
        bin.hf_abs = max_skip_nan(bin.hf_abs, r.hf_abs);
        bin.total = max_skip_nan(bin.total, r.total);
    }
    bins
}

/// For each left timestamp, the right value with the nearest timestamp.
/// Both inputs must be sorted; ties go to the earlier right timestamp.
pub fn merge_nearest<Tz: TimeZone, T: Copy>(
    left: &[DateTime<Tz>],
    right: &[(DateTime<Tz>, T)],
) -> Vec<Option<T>> {
    left.iter()
        .map(|ts| {
            let idx = right.partition_point(|(t, _)| t < ts);
            let before = idx.checked_sub(1).map(|i| &right[i]);
            let after = right.get(idx);
            match (before, after) {
                (Some((tb, vb)), Some((ta, va))) => {
                    if ts.clone() - tb.clone() <= ta.clone() - ts.clone() {
                        Some(*vb)
                    } else {
                        Some(*va)
                    }
                }
                (Some((_, v)), None) | (None, Some((_, v))) => Some(*v),
                (None, None) => None,
            }
        })
        .collect()
}

/// Final PPG feature row, one per surviving HF timestamp
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergedHrvRow {
    pub timestamp: DateTime<FixedOffset>,
    pub hf_n: f64,
    pub hf_abs: f64,
    pub lf_n: Option<f64>,
    pub lf_abs: Option<f64>,
    pub lf_hf_ratio: Option<f64>,
    pub total: Option<f64>,
}

/// Split the resampled table into the HF, LF, LF/HF and total streams, drop
/// missing values from each and align them on the HF timestamps.
pub fn merge_hrv_streams(resampled: &[HrvWindow]) -> Vec<MergedHrvRow> {
    let mut hf: Vec<(DateTime<FixedOffset>, (f64, f64))> = resampled
        .iter()
        .filter(|r| !r.hf_n.is_nan() && !r.hf_abs.is_nan())
        .map(|r| (r.timestamp, (r.hf_n, r.hf_abs)))
        .collect();
    let mut lf: Vec<(DateTime<FixedOffset>, (f64, f64))> = resampled
        .iter()
        .filter(|r| !r.lf_n.is_nan() && !r.lf_abs.is_nan())
        .map(|r| (r.timestamp, (r.lf_n, r.lf_abs)))
        .collect();
    let mut ratio: Vec<(DateTime<FixedOffset>, f64)> = resampled
        .iter()
        .filter(|r| !r.lf_hf_ratio.is_nan())
        .map(|r| (r.timestamp, r.lf_hf_ratio))
        .collect();
    let mut total: Vec<(DateTime<FixedOffset>, f64)> = resampled
        .iter()
        .filter(|r| !r.total.is_nan())
        .map(|r| (r.timestamp, r.total))
        .collect();

    hf.sort_by_key(|(t, _)| *t);
    lf.sort_by_key(|(t, _)| *t);
    ratio.sort_by_key(|(t, _)| *t);
    total.sort_by_key(|(t, _)| *t);

    let keys: Vec<DateTime<FixedOffset>> = hf.iter().map(|(t, _)| *t).collect();
    let lf_matched = merge_nearest(&keys, &lf);
    let ratio_matched = merge_nearest(&keys, &ratio);
    let total_matched = merge_nearest(&keys, &total);

    hf.iter()
        .enumerate()
        .map(|(i, &(timestamp, (hf_n, hf_abs)))| MergedHrvRow {
            timestamp,
            hf_n,
            hf_abs,
            lf_n: lf_matched[i].map(|(n, _)| n),
            lf_abs: lf_matched[i].map(|(_, a)| a),
            lf_hf_ratio: ratio_matched[i],
            total: total_matched[i],
        })
        .collect()
}

/// Rows with `start <= timestamp < end`, measured from the first row.
pub fn select_range(rows: &[MergedHrvRow], start_min: u32, end_min: u32) -> Vec<MergedHrvRow> {
    let Some(origin) = rows.iter().map(|r| r.timestamp).min() else {
        return Vec::new();
    };
    let start = origin + Duration::minutes(start_min as i64);
    let end = origin + Duration::minutes(end_min as i64);
    rows.iter()
        .filter(|r| r.timestamp >= start && r.timestamp < end)
        .copied()
        .collect()
}

#[derive(Debug)]
pub struct PpgReport {
    pub samples: usize,
    pub window_records: usize,
    pub resampled_rows: usize,
    pub merged: Vec<MergedHrvRow>,
    pub written: Vec<PathBuf>,
}

/// Missing values become NaN gaps in the plotted line
fn plot_column(rows: &[MergedHrvRow], value: impl Fn(&MergedHrvRow) -> Option<f64>) -> Vec<f64> {
    rows.iter().map(|r| value(r).unwrap_or(f64::NAN)).collect()
}

fn render_power_plots(
    rows: &[MergedHrvRow],
    dir: &Path,
    stem: &str,
    title: &str,
    size_inches: (f64, f64),
    subject: &SubjectMetadata,
) -> Result<Vec<PathBuf>> {
    let origin = rows.first().map(|r| r.timestamp);
    let x: Vec<f64> = rows
        .iter()
        .map(|r| match origin {
            Some(o) => (r.timestamp - o).num_milliseconds() as f64 / 1000.0,
            None => 0.0,
        })
        .collect();
    let hf_abs = plot_column(rows, |r| Some(r.hf_abs));
    let lf_abs = plot_column(rows, |r| r.lf_abs);
    let hf_n = plot_column(rows, |r| Some(r.hf_n));
    let lf_n = plot_column(rows, |r| r.lf_n);
    let ratio = plot_column(rows, |r| r.lf_hf_ratio);

    let x_label = match origin {
        Some(o) => format!("Time (s from {})", o.format("%Y-%m-%d %H:%M:%S")),
        None => "Time (s)".to_string(),
    };

    let abs_chart = plotting::LineChart {
        title: format!("HRV Absolute Power - {}", title),
        subtitle: subject.title_line(),
        x_label: x_label.clone(),
        y_label: "Power (ms²) / Ratio".into(),
        series: vec![
            plotting::Series::new("HF_abs", &x, &hf_abs),
            plotting::Series::new("LF_abs", &x, &lf_abs),
            plotting::Series::new("LF/HF Ratio", &x, &ratio),
        ],
        y_range: None,
        y_tick_step: None,
        annotation: None,
        size_inches,
    };
    let norm_chart = plotting::LineChart {
        title: format!("HRV Normalized Power - {}", title),
        subtitle: subject.title_line(),
        x_label,
        y_label: "Normalized Power / Ratio".into(),
        series: vec![
            plotting::Series::new("HF_n (Normalized)", &x, &hf_n),
            plotting::Series::new("LF_n (Normalized)", &x, &lf_n),
            plotting::Series::new("LF/HF Ratio", &x, &ratio),
        ],
        y_range: None,
        y_tick_step: None,
        annotation: None,
        size_inches,
    };

    let abs_path = dir.join(format!("{}_abs.png", stem));
    plotting::render_line_chart(&abs_path, &abs_chart)?;
    println!("Saved graph: {}", abs_path.display());

    let norm_path = dir.join(format!("{}_norm.png", stem));
    plotting::render_line_chart(&norm_path, &norm_chart)?;
    println!("Saved graph: {}", norm_path.display());

    Ok(vec![abs_path, norm_path])
}

/// Windowed frequency-domain HRV for one raw PPG recording.
pub fn run_ppg_pipeline(config: &PpgConfig, subject: &SubjectMetadata) -> Result<PpgReport> {
    let sample_rate = config.sampling_rate;
    if sample_rate == 0 || config.window_seconds == 0 {
        return Err(PipelineError::Config(
            "PPG sampling rate and window length must be positive".into(),
        ));
    }
    let offset = config.offset()?;
    let name = config.output_name();
    let out_dir = config.output_dir();
    std::fs::create_dir_all(&out_dir)?;

    println!("Processing PPG data {}", config.input.display());
    let recording = data_loading::read_ppg_recording(
        &config.input,
        &config.signal_column,
        &config.timestamp_column,
    )?;
    if recording.is_empty() {
        return Err(PipelineError::EmptySignal(format!(
            "{} has no PPG samples",
            config.input.display()
        )));
    }

    let timestamps: Vec<DateTime<FixedOffset>> = recording
        .timestamps
        .iter()
        .map(|t| t.with_timezone(&offset))
        .collect();
    let clean = preprocessing::clean_ppg(&recording.values, sample_rate as f64)?;

    let window_samples = config.window_samples();
    let records = sliding_hrv(&clean, &timestamps, window_samples, sample_rate);
    println!("HRV windows with beats: {}", records.len());
    if records.is_empty() {
        warn!(
            "No HRV windows: {} samples for a {} sample window",
            clean.len(),
            window_samples
        );
    }

    let resampled = resample_max_1s(&records);
    let merged = merge_hrv_streams(&resampled);

    let mut written = Vec::new();
    let csv_path = out_dir.join(format!("{}.csv", name));
    output::write_hrv_table(&csv_path, &merged)?;
    println!("Saved merged HRV data: {}", csv_path.display());
    written.push(csv_path);

    if config.render_plots {
        written.extend(render_power_plots(&merged, &out_dir, &name, &name, (16.0, 8.0), subject)?);
    }

    for range in &config.segments {
        let segment = select_range(&merged, range.start_min, range.end_min);
        let stem = format!("{}_{}", name, range.label());

        let path = out_dir.join(format!("{}.csv", stem));
        output::write_hrv_table(&path, &segment)?;
        println!("Saved CSV segment: {}", path.display());
        written.push(path);

        if config.render_plots {
            let title = format!("{} {}-{} min", name, range.start_min, range.end_min);
            written.extend(render_power_plots(
                &segment,
                &out_dir,
                &stem,
                &title,
                (12.0, 6.0),
                subject,
            )?);
        }
    }

    Ok(PpgReport {
        samples: recording.len(),
        window_records: records.len(),
        resampled_rows: resampled.len(),
        merged,
        written,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn bangkok(sec: i64) -> DateTime<FixedOffset> {
        let offset = FixedOffset::east_opt(7 * 3600).unwrap();
        DateTime::from_timestamp(sec, 0).unwrap().with_timezone(&offset)
    }

    /// Gaussian pulses at the given beat times (seconds)
    fn pulse_train(beats: &[f64], fs: f64, duration: f64) -> Vec<f64> {
        let n = (duration * fs) as usize;
        let sigma = 0.06;
        (0..n)
            .map(|i| {
                let t = i as f64 / fs;
                beats
                    .iter()
                    .map(|b| (-(t - b).powi(2) / (2.0 * sigma * sigma)).exp())
                    .sum()
            })
            .collect()
    }

    #[test]
    fn window_count_and_bounds() {
        let starts = window_starts(70_050, 60_000, 100);
        assert_eq!(starts.len(), 100);
        assert_eq!(starts[0], 0);
        assert_eq!(starts[1], 100);
        assert_eq!(*starts.last().unwrap(), 9_900);
        assert!(window_starts(60_000, 60_000, 100).is_empty());
        assert!(window_starts(100, 60_000, 100).is_empty());
    }

    #[test]
    fn elgendi_finds_every_pulse() {
        let fs = 100.0;
        let beats: Vec<f64> = (0..12).map(|k| 0.5 + k as f64 * 0.8).collect();
        let signal = pulse_train(&beats, fs, 10.0);

        let peaks = find_ppg_peaks(&signal, fs);
        let expected: Vec<usize> = beats.iter().map(|b| (b * fs).round() as usize).collect();
        assert_eq!(peaks, expected);

        let nni = nn_intervals(&peaks, fs);
        assert_eq!(nni.len(), 11);
        for v in nni {
            assert_abs_diff_eq!(v, 800.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn flat_signal_has_no_peaks() {
        assert!(find_ppg_peaks(&[0.0; 500], 100.0).is_empty());
    }

    #[test]
    fn welch_locates_a_sinusoid() {
        let fs = 4.0;
        let signal: Vec<f64> = (0..1024)
            .map(|i| (2.0 * PI * 0.25 * i as f64 / fs).sin())
            .collect();
        let (freqs, psd) = welch_psd(&signal, fs, 256, 4096);
        assert_eq!(freqs.len(), 2049);
        let peak = psd
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| freqs[i])
            .unwrap();
        assert_abs_diff_eq!(peak, 0.25, epsilon = 0.01);

        // Parseval: a unit sine carries 0.5 units of power
        let df = freqs[1] - freqs[0];
        let power: f64 = psd.iter().sum::<f64>() * df;
        assert_abs_diff_eq!(power, 0.5, epsilon = 0.05);
    }

    #[test]
    fn lf_modulated_intervals_are_lf_dominant() {
        // NN intervals oscillating at 0.1 Hz for about three minutes
        let mut nni = Vec::new();
        let mut t = 0.0;
        while t < 180.0 {
            let rr = 800.0 + 50.0 * (2.0 * PI * 0.1 * t).sin();
            nni.push(rr);
            t += rr / 1000.0;
        }
        let fd = frequency_domain(&nni);
        assert!(fd.lf_abs > fd.hf_abs);
        assert!(fd.lf_norm > 90.0, "lf_norm {}", fd.lf_norm);
        assert_abs_diff_eq!(fd.lf_norm + fd.hf_norm, 100.0, epsilon = 1e-9);
        assert_abs_diff_eq!(fd.total, fd.vlf_abs + fd.lf_abs + fd.hf_abs, epsilon = 1e-9);
        assert!(fd.lf_hf_ratio > 1.0);
    }

    #[test]
    fn vlf_band_starts_at_dc() {
        let freqs: Vec<f64> = (0..512).map(|k| k as f64 / 1024.0).collect();
        let df = 1.0 / 1024.0;

        let mut dc_only = vec![0.0; freqs.len()];
        dc_only[0] = 1.0;
        assert_abs_diff_eq!(band_power(&freqs, &dc_only, VLF_BAND), df, epsilon = 1e-15);
        assert_eq!(band_power(&freqs, &dc_only, LF_BAND), 0.0);

        // bins 0..=40 lie below 0.04 Hz
        let flat = vec![1.0; freqs.len()];
        assert_abs_diff_eq!(band_power(&freqs, &flat, VLF_BAND), 41.0 * df, epsilon = 1e-12);
    }

    #[test]
    fn too_few_intervals_are_undefined() {
        let fd = frequency_domain(&[800.0]);
        assert!(fd.lf_hf_ratio.is_nan());
        assert!(fd.total.is_nan());
    }

    fn record(ts: DateTime<FixedOffset>, value: f64) -> HrvWindow {
        HrvWindow {
            timestamp: ts,
            lf_hf_ratio: value,
            lf_n: value,
            hf_n: value,
            lf_abs: value,
            hf_abs: value,
            total: value,
        }
    }

    #[test]
    fn resample_takes_max_per_second_and_fills_gaps() {
        let base = bangkok(1_692_777_000);
        let records = vec![
            record(base + Duration::milliseconds(200), 1.0),
            record(base + Duration::milliseconds(700), 3.0),
            record(base + Duration::seconds(3), 2.0),
            record(base + Duration::milliseconds(3500), f64::NAN),
        ];
        let resampled = resample_max_1s(&records);
        assert_eq!(resampled.len(), 4);
        assert_eq!(resampled[0].timestamp, base);
        assert_eq!(resampled[0].hf_n, 3.0);
        assert!(resampled[1].hf_n.is_nan());
        assert!(resampled[2].total.is_nan());
        assert_eq!(resampled[3].total, 2.0);
        assert_eq!(resampled[3].timestamp.offset().local_minus_utc(), 7 * 3600);
    }

    #[test]
    fn nearest_merge_follows_hf_timestamps() {
        let t = bangkok(1_692_777_000);
        let nan = f64::NAN;
        let row = |ts, hf: f64, lf: f64, ratio: f64, total: f64| HrvWindow {
            timestamp: ts,
            lf_hf_ratio: ratio,
            lf_n: lf,
            hf_n: hf,
            lf_abs: lf * 10.0,
            hf_abs: hf * 10.0,
            total,
        };
        // HF {T}, LF {T, T+1}, LF/HF {T}, total {T+2}
        let resampled = vec![
            row(t, 40.0, 60.0, 1.5, nan),
            row(t + Duration::seconds(1), nan, 61.0, nan, nan),
            row(t + Duration::seconds(2), nan, nan, nan, 900.0),
        ];
        let merged = merge_hrv_streams(&resampled);
        assert_eq!(merged.len(), 1);
        let only = merged[0];
        assert_eq!(only.timestamp, t);
        assert_eq!(only.hf_n, 40.0);
        assert_eq!(only.hf_abs, 400.0);
        assert_eq!(only.lf_n, Some(60.0));
        assert_eq!(only.lf_abs, Some(600.0));
        assert_eq!(only.lf_hf_ratio, Some(1.5));
        assert_eq!(only.total, Some(900.0));
    }

    #[test]
    fn nearest_merge_prefers_earlier_on_ties() {
        let t = bangkok(1_692_777_000);
        let left = vec![t + Duration::seconds(1), t + Duration::seconds(5)];
        let right = vec![(t, 'a'), (t + Duration::seconds(2), 'b')];
        assert_eq!(merge_nearest(&left, &right), vec![Some('a'), Some('b')]);
        let empty: Vec<(DateTime<FixedOffset>, char)> = Vec::new();
        assert_eq!(merge_nearest(&left, &empty), vec![None, None]);
    }

    #[test]
    fn select_range_is_half_open_from_first_row() {
        let t = bangkok(1_692_777_000);
        let rows: Vec<MergedHrvRow> = (0..600)
            .map(|s| MergedHrvRow {
                timestamp: t + Duration::seconds(s),
                hf_n: 50.0,
                hf_abs: 1.0,
                lf_n: None,
                lf_abs: None,
                lf_hf_ratio: None,
                total: None,
            })
            .collect();
        let segment = select_range(&rows, 2, 5);
        assert_eq!(segment.len(), 180);
        assert_eq!(segment[0].timestamp, t + Duration::minutes(2));
        assert_eq!(segment[179].timestamp, t + Duration::seconds(299));
    }
}
