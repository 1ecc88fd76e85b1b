use crate::eda_analysis::{DecomposedEda, WindowAnalysis};
use crate::error::Result;
use crate::heart_analysis::MergedHrvRow;
use crate::preprocessing::DescriptiveStats;
use log::debug;
use serde::Serialize;
use std::path::Path;

/// Timestamp layout of derived HRV tables
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%:z";

fn create_writer(path: &Path) -> Result<csv::Writer<std::fs::File>> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    // Headers are written explicitly so empty tables still carry them
    Ok(csv::WriterBuilder::new().has_headers(false).from_path(path)?)
}

#[derive(Debug, Serialize)]
struct DecompositionRow {
    #[serde(rename = "EDA_Tonic")]
    tonic: f64,
    #[serde(rename = "EDA_Phasic")]
    phasic: f64,
}

/// Write rows `start..end` of a tonic/phasic decomposition, clamped to its length.
pub fn write_eda_decomposition(
    path: &Path,
    decomposed: &DecomposedEda,
    start: usize,
    end: usize,
) -> Result<()> {
    let end = end.min(decomposed.len());
    let start = start.min(end);

    let mut writer = create_writer(path)?;
    writer.write_record(["EDA_Tonic", "EDA_Phasic"])?;
    for i in start..end {
        writer.serialize(DecompositionRow {
            tonic: decomposed.tonic[i],
            phasic: decomposed.phasic[i],
        })?;
    }
    writer.flush()?;
    debug!("Wrote {} decomposition rows to {}", end - start, path.display());
    Ok(())
}

/// One line of the EDA summary table
#[derive(Debug, Clone, Serialize)]
pub struct EdaStatsRow {
    #[serde(rename = "Component")]
    pub component: String,
    #[serde(rename = "Min")]
    pub min: f64,
    #[serde(rename = "Max")]
    pub max: f64,
    #[serde(rename = "Mean")]
    pub mean: f64,
    #[serde(rename = "Median")]
    pub median: f64,
    #[serde(rename = "Standard Deviation")]
    pub std: f64,
    #[serde(rename = "Y_Axis_Min")]
    pub y_axis_min: f64,
    #[serde(rename = "Y_Axis_Max")]
    pub y_axis_max: f64,
    #[serde(rename = "Max_SCR_Height")]
    pub max_scr_height: Option<f64>,
}

pub const EDA_STATS_COLUMNS: [&str; 9] = [
    "Component",
    "Min",
    "Max",
    "Mean",
    "Median",
    "Standard Deviation",
    "Y_Axis_Min",
    "Y_Axis_Max",
    "Max_SCR_Height",
];

impl EdaStatsRow {
    pub fn new(component: &str, stats: &DescriptiveStats, window: &WindowAnalysis) -> Self {
        Self {
            component: component.to_string(),
            min: stats.min,
            max: stats.max,
            mean: stats.mean,
            median: stats.median,
            std: stats.std,
            y_axis_min: window.bounds.y_min,
            y_axis_max: window.bounds.y_max,
            max_scr_height: window.max_scr_height(),
        }
    }
}

pub fn write_eda_stats(path: &Path, rows: &[EdaStatsRow]) -> Result<()> {
    let mut writer = create_writer(path)?;
    writer.write_record(EDA_STATS_COLUMNS)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct HrvCsvRow {
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "HF_n_PG_EB")]
    hf_n: f64,
    #[serde(rename = "HF_abs_PG_EB")]
    hf_abs: f64,
    #[serde(rename = "LF_n_PG_EB")]
    lf_n: Option<f64>,
    #[serde(rename = "LF_abs_PG_EB")]
    lf_abs: Option<f64>,
    #[serde(rename = "LFHF_ratio_PG_EB")]
    lf_hf_ratio: Option<f64>,
    #[serde(rename = "Total_PG_EB")]
    total: Option<f64>,
}

pub const HRV_COLUMNS: [&str; 7] = [
    "Timestamp",
    "HF_n_PG_EB",
    "HF_abs_PG_EB",
    "LF_n_PG_EB",
    "LF_abs_PG_EB",
    "LFHF_ratio_PG_EB",
    "Total_PG_EB",
];

/// Write the merged HRV table; unmatched values become empty cells.
pub fn write_hrv_table(path: &Path, rows: &[MergedHrvRow]) -> Result<()> {
    let mut writer = create_writer(path)?;
    writer.write_record(HRV_COLUMNS)?;
    for row in rows {
        writer.serialize(HrvCsvRow {
            timestamp: row.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            hf_n: row.hf_n,
            hf_abs: row.hf_abs,
            lf_n: row.lf_n,
            lf_abs: row.lf_abs,
            lf_hf_ratio: row.lf_hf_ratio,
            total: row.total,
        })?;
    }
    writer.flush()?;
    debug!("Wrote {} HRV rows to {}", rows.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, FixedOffset};

    #[test]
    fn decomposition_rows_are_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg.csv");
        let decomposed = DecomposedEda {
            tonic: vec![1.0, 2.0, 3.0],
            phasic: vec![0.1, 0.2, 0.3],
        };
        write_eda_decomposition(&path, &decomposed, 1, 10).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "EDA_Tonic,EDA_Phasic\n2.0,0.2\n3.0,0.3\n");

        write_eda_decomposition(&path, &decomposed, 5, 10).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "EDA_Tonic,EDA_Phasic\n");
    }

    #[test]
    fn hrv_table_leaves_unmatched_cells_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("ppg.csv");
        let offset = FixedOffset::east_opt(7 * 3600).unwrap();
        let timestamp: DateTime<FixedOffset> = DateTime::from_timestamp(1_692_777_039, 0)
            .unwrap()
            .with_timezone(&offset);
        let rows = vec![MergedHrvRow {
            timestamp,
            hf_n: 40.0,
            hf_abs: 120.5,
            lf_n: Some(60.0),
            lf_abs: None,
            lf_hf_ratio: Some(1.5),
            total: None,
        }];
        write_hrv_table(&path, &rows).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap(), HRV_COLUMNS.join(","));
        assert_eq!(
            lines.next().unwrap(),
            "2023-08-23 14:50:39+07:00,40.0,120.5,60.0,,1.5,"
        );
        assert!(lines.next().is_none());
    }
}
