use crate::error::{PipelineError, Result};
use chrono::{DateTime, Utc};
use log::debug;
use std::fs::File;
use std::path::Path;

/// Raw PPG samples with their acquisition timestamps, in file order.
#[derive(Debug, Clone)]
pub struct PpgRecording {
    pub timestamps: Vec<DateTime<Utc>>,
    pub values: Vec<f64>,
}

impl PpgRecording {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

pub fn ensure_exists(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(PipelineError::MissingFile {
            path: path.to_path_buf(),
        })
    }
}

fn open_reader(path: &Path) -> Result<csv::Reader<File>> {
    ensure_exists(path)?;
    let file = File::open(path)?;
    Ok(csv::ReaderBuilder::new()
        .flexible(true) // EmotiBit exports occasionally carry trailing fields
        .from_reader(file))
}

fn column_index(headers: &csv::StringRecord, column: &str, path: &Path) -> Result<usize> {
    headers
        .iter()
        .position(|h| h.trim() == column)
        .ok_or_else(|| PipelineError::MissingColumn {
            column: column.to_string(),
            path: path.to_path_buf(),
        })
}

/// Parse a numeric cell; blank cells become NaN the way a dataframe reader would.
fn parse_value(raw: Option<&str>, column: &str, row: usize, path: &Path) -> Result<f64> {
    let raw = raw.unwrap_or("").trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("nan") {
        return Ok(f64::NAN);
    }
    raw.parse::<f64>().map_err(|e| {
        PipelineError::ComputationFailure(format!(
            "{} row {} column '{}': cannot parse '{}': {}",
            path.display(),
            row + 1,
            column,
            raw,
            e
        ))
    })
}

/// Load one numeric column of a CSV export.
pub fn read_signal_column(path: &Path, column: &str) -> Result<Vec<f64>> {
    let mut rdr = open_reader(path)?;
    let headers = rdr.headers()?.clone();
    let idx = column_index(&headers, column, path)?;

    let mut values = Vec::new();
    for (row, record) in rdr.records().enumerate() {
        let record = record?;
        values.push(parse_value(record.get(idx), column, row, path)?);
    }

    debug!("Read {} values of '{}' from {}", values.len(), column, path.display());
    Ok(values)
}

/// Convert fractional Unix-epoch seconds to a UTC timestamp (microsecond precision).
pub fn epoch_seconds_to_utc(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    DateTime::from_timestamp_micros((seconds * 1_000_000.0).round() as i64)
}

/// Load the waveform and epoch-timestamp columns of a PPG export.
pub fn read_ppg_recording(
    path: &Path,
    signal_column: &str,
    timestamp_column: &str,
) -> Result<PpgRecording> {
    let mut rdr = open_reader(path)?;
    let headers = rdr.headers()?.clone();
    let signal_idx = column_index(&headers, signal_column, path)?;
    let ts_idx = column_index(&headers, timestamp_column, path)?;

    let mut timestamps = Vec::new();
    let mut values = Vec::new();
    for (row, record) in rdr.records().enumerate() {
        let record = record?;
        let seconds = parse_value(record.get(ts_idx), timestamp_column, row, path)?;
        let timestamp = epoch_seconds_to_utc(seconds).ok_or_else(|| {
            PipelineError::ComputationFailure(format!(
                "{} row {}: invalid timestamp {}",
                path.display(),
                row + 1,
                seconds
            ))
        })?;
        timestamps.push(timestamp);
        values.push(parse_value(record.get(signal_idx), signal_column, row, path)?);
    }

    debug!("Read {} PPG samples from {}", values.len(), path.display());
    Ok(PpgRecording { timestamps, values })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(dir: &tempfile::TempDir, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn reads_named_column_with_blanks() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(&dir, "ea.csv", "LocalTimestamp,EA\n1.0,0.5\n2.0,\n3.0,0.7\n");
        let values = read_signal_column(&path, "EA").unwrap();
        assert_eq!(values.len(), 3);
        assert_eq!(values[0], 0.5);
        assert!(values[1].is_nan());
        assert_eq!(values[2], 0.7);
    }

    #[test]
    fn reports_missing_file_and_column() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.csv");
        assert!(read_signal_column(&missing, "EA").unwrap_err().is_missing_file());

        let path = write_csv(&dir, "ea.csv", "LocalTimestamp,XX\n1.0,0.5\n");
        match read_signal_column(&path, "EA") {
            Err(PipelineError::MissingColumn { column, .. }) => assert_eq!(column, "EA"),
            other => panic!("expected missing column, got {:?}", other),
        }
    }

    #[test]
    fn reads_ppg_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            &dir,
            "pg.csv",
            "LocalTimestamp,PG\n1692777039.25,100\n1692777039.26,101\n",
        );
        let recording = read_ppg_recording(&path, "PG", "LocalTimestamp").unwrap();
        assert_eq!(recording.len(), 2);
        assert_eq!(recording.timestamps[0].timestamp(), 1_692_777_039);
        assert_eq!(recording.timestamps[0].timestamp_subsec_millis(), 250);
        assert_eq!(recording.values[1], 101.0);
    }
}
