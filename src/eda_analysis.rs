use crate::config::{DecompositionMethod, EdaConfig, SubjectMetadata, TimeRange};
use crate::error::{PipelineError, Result};
use crate::preprocessing::{self, DescriptiveStats};
use crate::{data_loading, output, plotting};
use log::{debug, warn};
use std::path::PathBuf;

/// Tonic (slow level) and phasic (fast response) parts of a cleaned EDA signal.
#[derive(Debug, Clone)]
pub struct DecomposedEda {
    pub tonic: Vec<f64>,
    pub phasic: Vec<f64>,
}

impl DecomposedEda {
    pub fn len(&self) -> usize {
        self.tonic.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tonic.is_empty()
    }

    /// Clamp `[start, end)` to the signal like slice indexing in a dataframe.
    fn clamp(&self, start: usize, end: usize) -> (usize, usize) {
        let end = end.min(self.len());
        (start.min(end), end)
    }
}

pub fn decompose(clean: &[f64], sample_rate: usize, method: DecompositionMethod) -> Result<DecomposedEda> {
    let fs = sample_rate as f64;
    let (tonic, phasic) = match method {
        DecompositionMethod::SmoothMedian => {
            let mut size = 4 * sample_rate;
            if size % 2 == 0 {
                size += 1;
            }
            let tonic = preprocessing::rolling_median(clean, size);
            let phasic = clean.iter().zip(&tonic).map(|(c, t)| c - t).collect();
            (tonic, phasic)
        }
        DecompositionMethod::Highpass => (
            preprocessing::lowpass(clean, fs, 0.05, 2)?,
            preprocessing::highpass(clean, fs, 0.05, 2)?,
        ),
    };
    debug!("Decomposed {} EDA samples with {:?}", clean.len(), method);
    Ok(DecomposedEda { tonic, phasic })
}

/// Mean tonic level over the baseline window. NaN when the window is empty.
pub fn baseline_tonic(decomposed: &DecomposedEda, baseline: TimeRange, sample_rate: usize) -> f64 {
    let (start, end) = baseline.sample_bounds(sample_rate);
    let (start, end) = decomposed.clamp(start, end);
    if start == end {
        warn!("Baseline window {} holds no samples", baseline);
    }
    preprocessing::mean(&decomposed.tonic[start..end])
}

/// Skin conductance responses found in a phasic trace.
#[derive(Debug, Clone, Default)]
pub struct ScrPeaks {
    pub onsets: Vec<usize>,
    pub peaks: Vec<usize>,
    /// Phasic value at each peak
    pub heights: Vec<f64>,
}

impl ScrPeaks {
    pub fn max_height(&self) -> Option<f64> {
        if self.heights.is_empty() {
            None
        } else {
            Some(preprocessing::nan_max(&self.heights))
        }
    }
}

/// Local maxima with plateaus resolved to their middle sample; edges are never peaks.
fn local_maxima(x: &[f64]) -> Vec<usize> {
    let mut peaks = Vec::new();
    if x.len() < 3 {
        return peaks;
    }
    let mut i = 1;
    while i < x.len() - 1 {
        if x[i - 1] < x[i] {
            let mut ahead = i + 1;
            while ahead < x.len() - 1 && x[ahead] == x[i] {
                ahead += 1;
            }
            if x[ahead] < x[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
                continue;
            }
        }
        i += 1;
    }
    peaks
}

/// Detect SCR peaks, keeping those whose rise from onset is at least
/// `amplitude_min` times the largest rise in the trace.
pub fn find_scr_peaks(phasic: &[f64], amplitude_min: f64) -> ScrPeaks {
    let candidates: Vec<(usize, usize, f64)> = local_maxima(phasic)
        .into_iter()
        .map(|peak| {
            let mut onset = peak;
            while onset > 0 && phasic[onset - 1] < phasic[onset] {
                onset -= 1;
            }
            (onset, peak, phasic[peak] - phasic[onset])
        })
        .collect();

    let largest = candidates
        .iter()
        .map(|&(_, _, amplitude)| amplitude)
        .fold(0.0, f64::max);

    let mut result = ScrPeaks::default();
    if largest <= 0.0 {
        return result;
    }
    for (onset, peak, amplitude) in candidates {
        if amplitude / largest >= amplitude_min {
            result.onsets.push(onset);
            result.peaks.push(peak);
            result.heights.push(phasic[peak]);
        }
    }
    debug!("Found {} SCR peaks (largest rise {:.4})", result.peaks.len(), largest);
    result
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisBounds {
    pub y_min: f64,
    pub y_max: f64,
}

/// Shared y-range for both traces: floor of the lowest value, ceiling of the highest.
pub fn axis_bounds(tonic: &[f64], phasic: &[f64]) -> AxisBounds {
    let low = preprocessing::nan_min(&[preprocessing::nan_min(tonic), preprocessing::nan_min(phasic)]);
    let high = preprocessing::nan_max(&[preprocessing::nan_max(tonic), preprocessing::nan_max(phasic)]);
    AxisBounds {
        y_min: low.floor(),
        y_max: high.ceil(),
    }
}

/// Baseline-corrected view of one stretch of the decomposed signal.
#[derive(Debug, Clone)]
pub struct WindowAnalysis {
    pub range: TimeRange,
    pub start_idx: usize,
    pub end_idx: usize,
    /// Seconds from the start of the window
    pub time: Vec<f64>,
    pub debased_tonic: Vec<f64>,
    pub phasic: Vec<f64>,
    pub bounds: AxisBounds,
    pub scr: ScrPeaks,
}

impl WindowAnalysis {
    pub fn max_scr_height(&self) -> Option<f64> {
        self.scr.max_height()
    }
}

pub fn analyze_window(
    decomposed: &DecomposedEda,
    baseline: f64,
    range: TimeRange,
    sample_rate: usize,
    amplitude_min: f64,
) -> Result<WindowAnalysis> {
    let (start, end) = range.sample_bounds(sample_rate);
    let (start_idx, end_idx) = decomposed.clamp(start, end);
    if start_idx == end_idx {
        return Err(PipelineError::EmptySignal(format!(
            "window {} min holds no samples ({} available)",
            range,
            decomposed.len()
        )));
    }
    if end_idx < end {
        warn!(
            "Window {} min truncated to {} samples by the end of the recording",
            range,
            end_idx - start_idx
        );
    }

    let debased_tonic: Vec<f64> = decomposed.tonic[start_idx..end_idx]
        .iter()
        .map(|t| t - baseline)
        .collect();
    let phasic = decomposed.phasic[start_idx..end_idx].to_vec();
    let time = (0..phasic.len())
        .map(|i| i as f64 / sample_rate as f64)
        .collect();
    let bounds = axis_bounds(&debased_tonic, &phasic);
    let scr = find_scr_peaks(&phasic, amplitude_min);

    Ok(WindowAnalysis {
        range,
        start_idx,
        end_idx,
        time,
        debased_tonic,
        phasic,
        bounds,
        scr,
    })
}

#[derive(Debug)]
pub struct EdaReport {
    pub samples: usize,
    pub baseline: f64,
    pub full: WindowAnalysis,
    pub tonic_stats: DescriptiveStats,
    pub phasic_stats: DescriptiveStats,
    pub segments: Vec<WindowAnalysis>,
    pub written: Vec<PathBuf>,
}

fn print_stats(label: &str, stats: &DescriptiveStats) {
    println!("\n{} Component Stats:", label);
    println!("Min: {:.3}", stats.min);
    println!("Max: {:.3}", stats.max);
    println!("Mean: {:.3}", stats.mean);
    println!("Median: {:.3}", stats.median);
    println!("Standard Deviation: {:.3}", stats.std);
}

fn render_window(
    path: &std::path::Path,
    title: String,
    window: &WindowAnalysis,
    subject: &SubjectMetadata,
) -> Result<()> {
    let chart = plotting::LineChart {
        title,
        subtitle: subject.title_line(),
        x_label: "Time (seconds)".into(),
        y_label: "EDA Signal".into(),
        series: vec![
            plotting::Series::new("Tonic Component", &window.time, &window.debased_tonic).width(2),
            plotting::Series::new("Phasic Component", &window.time, &window.phasic),
        ],
        y_range: Some((window.bounds.y_min, window.bounds.y_max)),
        y_tick_step: Some(0.25),
        annotation: Some(format!(
            "Y-axis range: [{:.2}, {:.2}]",
            window.bounds.y_min, window.bounds.y_max
        )),
        size_inches: (12.0, 6.0),
    };
    plotting::render_line_chart(path, &chart)?;
    println!("Saved graph: {}", path.display());
    Ok(())
}

/// Clean, decompose and analyse one raw EDA recording, writing CSVs and plots.
pub fn run_eda_pipeline(config: &EdaConfig, subject: &SubjectMetadata) -> Result<EdaReport> {
    let sample_rate = config.sampling_rate;
    if sample_rate == 0 {
        return Err(PipelineError::Config("EDA sampling rate must be positive".into()));
    }
    let name = config.output_name();
    let out_dir = config.output_dir();
    std::fs::create_dir_all(&out_dir)?;

    println!("Reading EDA file {}", config.input.display());
    let raw = data_loading::read_signal_column(&config.input, &config.column)?;
    println!("EDA samples: {} ({:.1} min at {} Hz)", raw.len(), raw.len() as f64 / sample_rate as f64 / 60.0, sample_rate);

    let clean = preprocessing::clean_eda(&raw, sample_rate as f64)?;
    let decomposed = decompose(&clean, sample_rate, config.method)?;

    let baseline = baseline_tonic(&decomposed, config.baseline, sample_rate);
    debug!("Baseline tonic over {} min: {:.4}", config.baseline, baseline);

    let full = analyze_window(&decomposed, baseline, config.analysis, sample_rate, config.amplitude_min)?;
    let mut written = Vec::new();

    if config.render_plots {
        let path = out_dir.join(format!("{}.png", name));
        render_window(&path, format!("EDA - {}", name), &full, subject)?;
        written.push(path);
    }

    let csv_path = out_dir.join(format!("{}.csv", name));
    output::write_eda_decomposition(&csv_path, &decomposed, 0, decomposed.len())?;
    println!("Saved CSV data: {}", csv_path.display());
    written.push(csv_path);

    let tonic_stats = preprocessing::describe(&full.debased_tonic);
    let phasic_stats = preprocessing::describe(&full.phasic);
    print_stats("Tonic", &tonic_stats);
    print_stats("Phasic", &phasic_stats);
    if let Some(height) = full.max_scr_height() {
        println!("Largest SCR height: {:.3}", height);
    }

    let stats_path = out_dir.join(&config.stats_filename);
    output::write_eda_stats(
        &stats_path,
        &[
            output::EdaStatsRow::new("Tonic", &tonic_stats, &full),
            output::EdaStatsRow::new("Phasic", &phasic_stats, &full),
        ],
    )?;
    println!("Saved EDA stats to CSV: {}", stats_path.display());
    written.push(stats_path);

    let mut segments = Vec::with_capacity(config.segments.len());
    for &range in &config.segments {
        let window = analyze_window(&decomposed, baseline, range, sample_rate, config.amplitude_min)?;
        let stem = format!("{}_{}", name, range.label());

        if config.render_plots {
            let path = out_dir.join(format!("{}.png", stem));
            render_window(&path, format!("EDA - {}", stem), &window, subject)?;
            written.push(path);
        }

        let path = out_dir.join(format!("{}.csv", stem));
        output::write_eda_decomposition(&path, &decomposed, window.start_idx, window.end_idx)?;
        println!("Saved CSV data: {}", path.display());
        written.push(path);

        segments.push(window);
    }

    Ok(EdaReport {
        samples: raw.len(),
        baseline,
        full,
        tonic_stats,
        phasic_stats,
        segments,
        written,
    })
}
