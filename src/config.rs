use crate::error::{PipelineError, Result};
use chrono::FixedOffset;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// A `[start, end)` span of an experiment timeline, in whole minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TimeRange {
    pub start_min: u32,
    pub end_min: u32,
}

impl TimeRange {
    pub const fn new(start_min: u32, end_min: u32) -> Self {
        Self { start_min, end_min }
    }

    /// Sample indices covered by this range at `sampling_rate` Hz.
    pub fn sample_bounds(&self, sampling_rate: usize) -> (usize, usize) {
        (
            minutes_to_samples(self.start_min, sampling_rate),
            minutes_to_samples(self.end_min, sampling_rate),
        )
    }

    /// File name suffix, e.g. `2to5min`.
    pub fn label(&self) -> String {
        format!("{}to{}min", self.start_min, self.end_min)
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start_min, self.end_min)
    }
}

impl FromStr for TimeRange {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (start, end) = s
            .split_once('-')
            .ok_or_else(|| format!("Invalid time range: {}. Use START-END in minutes, e.g. 2-5", s))?;
        let start_min: u32 = start
            .trim()
            .parse()
            .map_err(|e| format!("Invalid range start '{}': {}", start, e))?;
        let end_min: u32 = end
            .trim()
            .parse()
            .map_err(|e| format!("Invalid range end '{}': {}", end, e))?;
        if end_min <= start_min {
            return Err(format!("Time range {} ends before it starts", s));
        }
        Ok(TimeRange { start_min, end_min })
    }
}

pub fn minutes_to_samples(minutes: u32, sampling_rate: usize) -> usize {
    minutes as usize * 60 * sampling_rate
}

/// Per-subject values stamped onto every output row and plot title.
#[derive(clap::Args, Debug, Clone, Default, Deserialize)]
pub struct SubjectMetadata {
    /// Subject identifier, e.g. S08
    #[arg(long = "subject", default_value = "")]
    #[serde(default)]
    pub id: String,

    #[arg(long, default_value = "")]
    #[serde(default)]
    pub age: String,

    #[arg(long, default_value = "")]
    #[serde(default)]
    pub gender: String,

    #[arg(long, default_value = "")]
    #[serde(default)]
    pub bmi: String,

    /// Operator-supplied pain label (None, Mild, Moderate, Severe or a number)
    #[arg(long, default_value = "")]
    #[serde(default)]
    pub pain_level: String,
}

impl SubjectMetadata {
    pub fn title_line(&self) -> String {
        format!(
            "Age: {}, Gender: {}, BMI: {}, Pain Level: {}",
            self.age, self.gender, self.bmi, self.pain_level
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecompositionMethod {
    /// Tonic is a 4 s running median, phasic is the residual
    #[default]
    SmoothMedian,
    /// Tonic/phasic split by 0.05 Hz Butterworth low/high-pass filters
    Highpass,
}

fn default_eda_rate() -> usize {
    15
}
fn default_eda_column() -> String {
    "EA".to_string()
}
fn default_stats_filename() -> String {
    "eda.csv".to_string()
}
fn default_baseline() -> TimeRange {
    TimeRange::new(0, 2)
}
fn default_analysis() -> TimeRange {
    TimeRange::new(2, 12)
}
fn default_eda_segments() -> Vec<TimeRange> {
    vec![TimeRange::new(2, 5), TimeRange::new(5, 8), TimeRange::new(8, 12)]
}
fn default_amplitude_min() -> f64 {
    0.05
}
fn default_true() -> bool {
    true
}

/// Process a raw EDA export into tonic/phasic components
#[derive(clap::Args, Debug, Clone, Deserialize)]
pub struct EdaConfig {
    /// Raw EDA CSV export
    pub input: PathBuf,

    /// Directory for CSV/PNG outputs (defaults to the input's directory)
    #[arg(long)]
    #[serde(default)]
    pub output_dir: Option<PathBuf>,

    /// Output file stem (defaults to the input file stem)
    #[arg(long)]
    #[serde(default)]
    pub name: Option<String>,

    /// File name of the summary statistics CSV
    #[arg(long, default_value = "eda.csv")]
    #[serde(default = "default_stats_filename")]
    pub stats_filename: String,

    /// EDA sampling rate in Hz
    #[arg(long, default_value = "15")]
    #[serde(default = "default_eda_rate")]
    pub sampling_rate: usize,

    /// Conductance column name
    #[arg(long, default_value = "EA")]
    #[serde(default = "default_eda_column")]
    pub column: String,

    /// Baseline window (minutes)
    #[arg(long, default_value = "0-2")]
    #[serde(default = "default_baseline")]
    pub baseline: TimeRange,

    /// Full analysis window (minutes)
    #[arg(long, default_value = "2-12")]
    #[serde(default = "default_analysis")]
    pub analysis: TimeRange,

    /// Sub-windows analysed separately (minutes)
    #[arg(long, value_delimiter = ',', default_value = "2-5,5-8,8-12")]
    #[serde(default = "default_eda_segments")]
    pub segments: Vec<TimeRange>,

    /// Relative minimum amplitude of a phasic peak (fraction of the largest)
    #[arg(long, default_value = "0.05")]
    #[serde(default = "default_amplitude_min")]
    pub amplitude_min: f64,

    #[arg(long, value_enum, default_value_t = DecompositionMethod::SmoothMedian)]
    #[serde(default)]
    pub method: DecompositionMethod,

    /// Skip PNG rendering
    #[arg(long = "no-plots", action = ArgAction::SetFalse)]
    #[serde(default = "default_true")]
    pub render_plots: bool,
}

impl EdaConfig {
    pub fn output_dir(&self) -> PathBuf {
        resolve_output_dir(self.output_dir.as_deref(), &self.input)
    }

    pub fn output_name(&self) -> String {
        resolve_output_name(self.name.as_deref(), &self.input, "eda")
    }
}

fn default_ppg_rate() -> usize {
    100
}
fn default_window_seconds() -> usize {
    300
}
fn default_ppg_column() -> String {
    "PG".to_string()
}
fn default_timestamp_column() -> String {
    "LocalTimestamp".to_string()
}
fn default_utc_offset() -> String {
    "+07:00".to_string()
}
fn default_ppg_segments() -> Vec<TimeRange> {
    vec![TimeRange::new(2, 5), TimeRange::new(5, 7)]
}

/// Compute windowed frequency-domain HRV from a raw PPG export
#[derive(clap::Args, Debug, Clone, Deserialize)]
pub struct PpgConfig {
    /// Raw PPG CSV export
    pub input: PathBuf,

    /// Directory for CSV/PNG outputs (defaults to the input's directory)
    #[arg(long)]
    #[serde(default)]
    pub output_dir: Option<PathBuf>,

    /// Output file stem (defaults to the input file stem)
    #[arg(long)]
    #[serde(default)]
    pub name: Option<String>,

    /// PPG sampling rate in Hz
    #[arg(long, default_value = "100")]
    #[serde(default = "default_ppg_rate")]
    pub sampling_rate: usize,

    /// HRV window length in seconds
    #[arg(long, default_value = "300")]
    #[serde(default = "default_window_seconds")]
    pub window_seconds: usize,

    /// Waveform column name
    #[arg(long, default_value = "PG")]
    #[serde(default = "default_ppg_column")]
    pub signal_column: String,

    /// Unix-epoch timestamp column name (seconds)
    #[arg(long, default_value = "LocalTimestamp")]
    #[serde(default = "default_timestamp_column")]
    pub timestamp_column: String,

    /// Fixed UTC offset applied to output timestamps
    #[arg(long, default_value = "+07:00", allow_hyphen_values = true)]
    #[serde(default = "default_utc_offset")]
    pub utc_offset: String,

    /// Sub-ranges relative to the first HRV timestamp (minutes)
    #[arg(long, value_delimiter = ',', default_value = "2-5,5-7")]
    #[serde(default = "default_ppg_segments")]
    pub segments: Vec<TimeRange>,

    /// Skip PNG rendering
    #[arg(long = "no-plots", action = ArgAction::SetFalse)]
    #[serde(default = "default_true")]
    pub render_plots: bool,
}

impl PpgConfig {
    pub fn output_dir(&self) -> PathBuf {
        resolve_output_dir(self.output_dir.as_deref(), &self.input)
    }

    pub fn output_name(&self) -> String {
        resolve_output_name(self.name.as_deref(), &self.input, "ppg")
    }

    pub fn offset(&self) -> Result<FixedOffset> {
        self.utc_offset
            .parse::<FixedOffset>()
            .map_err(|e| PipelineError::Config(format!("utc offset '{}': {}", self.utc_offset, e)))
    }

    pub fn window_samples(&self) -> usize {
        self.window_seconds * self.sampling_rate
    }
}

/// Combine EDA, PPG and temperature features into one table
#[derive(clap::Args, Debug, Clone, Deserialize)]
pub struct MergeConfig {
    /// CSV written by the EDA job
    #[arg(long)]
    pub eda: PathBuf,

    /// CSV written by the PPG job (or a hand-edited PPG feature file)
    #[arg(long)]
    pub ppg: PathBuf,

    /// Temperature CSV export
    #[arg(long)]
    pub temperature: PathBuf,

    /// Combined CSV to write
    #[arg(long)]
    pub output: PathBuf,
}

/// Everything needed to rerun the pipelines for one subject and condition.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub subject: SubjectMetadata,
    #[serde(default)]
    pub eda: Option<EdaConfig>,
    #[serde(default)]
    pub ppg: Option<PpgConfig>,
    #[serde(default)]
    pub merge: Option<MergeConfig>,
}

impl SessionConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PipelineError::MissingFile {
                path: path.to_path_buf(),
            });
        }
        let file = std::fs::File::open(path)?;
        serde_json::from_reader(std::io::BufReader::new(file))
            .map_err(|e| PipelineError::Config(format!("{}: {}", path.display(), e)))
    }
}

/// Process EmotiBit pain-session recordings (EDA, PPG, skin temperature)
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Clean and decompose EDA, write per-window CSVs, statistics and plots
    Eda {
        #[command(flatten)]
        config: EdaConfig,
        #[command(flatten)]
        subject: SubjectMetadata,
    },
    /// Windowed frequency-domain HRV from PPG, resampled to 1 s
    Ppg {
        #[command(flatten)]
        config: PpgConfig,
        #[command(flatten)]
        subject: SubjectMetadata,
    },
    /// Merge EDA, PPG and temperature features with subject metadata
    Merge {
        #[command(flatten)]
        config: MergeConfig,
        #[command(flatten)]
        subject: SubjectMetadata,
    },
    /// Run every job listed in a JSON session file
    Run {
        /// Session configuration (JSON)
        #[arg(long, env = "PHYSIO_CONFIG")]
        config: PathBuf,

        /// Stop at the first failing job instead of continuing
        #[arg(long)]
        fail_fast: bool,
    },
}

fn resolve_output_dir(explicit: Option<&Path>, input: &Path) -> PathBuf {
    match explicit {
        Some(dir) => dir.to_path_buf(),
        None => input
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    }
}

fn resolve_output_name(explicit: Option<&str>, input: &Path, fallback: &str) -> String {
    match explicit {
        Some(name) => name.to_string(),
        None => input
            .file_stem()
            .and_then(|s| s.to_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| fallback.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_time_ranges() {
        let range: TimeRange = "2-5".parse().unwrap();
        assert_eq!(range, TimeRange::new(2, 5));
        assert_eq!(range.label(), "2to5min");
        assert_eq!(range.sample_bounds(15), (1800, 4500));
        assert!("5-2".parse::<TimeRange>().is_err());
        assert!("five".parse::<TimeRange>().is_err());
    }

    #[test]
    fn session_file_fills_defaults() {
        let json = r#"{
            "subject": {"id": "S08", "age": "21", "gender": "Male", "bmi": "29.7", "pain_level": "Mild"},
            "eda": {"input": "/data/S08/EA.csv", "name": "S08.warmpain_eda"},
            "ppg": {"input": "/data/S08/PG.csv", "segments": [{"start_min": 1, "end_min": 3}]}
        }"#;
        let session: SessionConfig = serde_json::from_str(json).unwrap();

        let eda = session.eda.unwrap();
        assert_eq!(eda.sampling_rate, 15);
        assert_eq!(eda.column, "EA");
        assert_eq!(eda.analysis, TimeRange::new(2, 12));
        assert_eq!(eda.segments.len(), 3);
        assert_eq!(eda.method, DecompositionMethod::SmoothMedian);
        assert!(eda.render_plots);
        assert_eq!(eda.output_dir(), PathBuf::from("/data/S08"));
        assert_eq!(eda.output_name(), "S08.warmpain_eda");

        let ppg = session.ppg.unwrap();
        assert_eq!(ppg.window_samples(), 30_000);
        assert_eq!(ppg.segments, vec![TimeRange::new(1, 3)]);
        assert_eq!(ppg.output_name(), "PG");
        assert_eq!(ppg.offset().unwrap().local_minus_utc(), 7 * 3600);

        assert!(session.merge.is_none());
        assert_eq!(session.subject.pain_level, "Mild");
    }

    #[test]
    fn cli_parses_eda_subcommand() {
        let args = Args::try_parse_from([
            "pain-physio",
            "eda",
            "raw/EA.csv",
            "--segments",
            "2-4,4-6",
            "--no-plots",
            "--pain-level",
            "Severe",
        ])
        .unwrap();
        match args.command {
            Command::Eda { config, subject } => {
                assert_eq!(config.segments, vec![TimeRange::new(2, 4), TimeRange::new(4, 6)]);
                assert!(!config.render_plots);
                assert_eq!(config.baseline, TimeRange::new(0, 2));
                assert_eq!(subject.pain_level, "Severe");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
