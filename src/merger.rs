use crate::config::{MergeConfig, SubjectMetadata};
use crate::data_loading::ensure_exists;
use crate::error::Result;
use log::{debug, warn};
use polars::prelude::*;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Output column and the source headers that may supply it, in preference order.
struct Target {
    name: &'static str,
    aliases: &'static [&'static str],
    source: Source,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Source {
    Eda,
    Ppg,
    Temperature,
}

const TARGETS: [Target; 7] = [
    Target {
        name: "EDA_Tonic",
        aliases: &["EDA_Tonic"],
        source: Source::Eda,
    },
    Target {
        name: "EDA_Phasic",
        aliases: &["EDA_Phasic"],
        source: Source::Eda,
    },
    Target {
        name: "HF_n_PG",
        aliases: &["HF_n_PG_", "HF_n_PG", "HF_n_PG_EB"],
        source: Source::Ppg,
    },
    Target {
        name: "LF_n_PG",
        aliases: &["LF_n_PG_f", "LF_n_PG", "LF_n_PG_EB"],
        source: Source::Ppg,
    },
    Target {
        // Header spelling is what downstream notebooks expect
        name: "LFHF_ratrio",
        aliases: &["LFHF_ratio", "LFHF_ratrio", "LFHF_ratio_PG_EB"],
        source: Source::Ppg,
    },
    Target {
        name: "Total_PG_EB",
        aliases: &["Total_PG_EB"],
        source: Source::Ppg,
    },
    Target {
        name: "Skintemp",
        aliases: &["T1", "Temp", "Temperature", "Skintemp", "Skin_Temperature"],
        source: Source::Temperature,
    },
];

/// Columns of the merged table, in order
pub const MERGED_COLUMNS: [&str; 11] = [
    "EDA_Tonic",
    "EDA_Phasic",
    "HF_n_PG",
    "LF_n_PG",
    "LFHF_ratrio",
    "Total_PG_EB",
    "Skintemp",
    "Gender",
    "BMI",
    "Age",
    "PainLevel",
];

#[derive(Debug)]
pub struct MergeReport {
    pub rows: usize,
    /// Target column and the source header it was taken from, if any
    pub resolved: Vec<(String, Option<String>)>,
    pub warnings: Vec<String>,
    pub output: PathBuf,
}

fn read_table(path: &Path, label: &str) -> Result<DataFrame> {
    ensure_exists(path)?;
    // Infer over every row so a late decimal does not break an integer-looking column
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(None)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;

    let names: Vec<&str> = df.get_column_names().iter().map(|c| c.as_str()).collect();
    println!("{} data shape: {:?}", label, df.shape());
    println!("{} columns: {:?}", label, names);
    Ok(df)
}

/// First alias present in `df`, renamed to the target name.
fn resolve(df: &DataFrame, target: &Target) -> Option<(Column, String)> {
    target.aliases.iter().find_map(|alias| {
        df.column(alias)
            .ok()
            .map(|col| (col.clone().with_name(target.name.into()), alias.to_string()))
    })
}

/// Combine EDA, PPG and temperature features into one table per subject.
///
/// All inputs are cut to the shortest one's row count. A target column with
/// no matching source header is written as nulls and reported as a warning.
pub fn merge_features(config: &MergeConfig, subject: &SubjectMetadata) -> Result<MergeReport> {
    let eda = read_table(&config.eda, "EDA")?;
    let ppg = read_table(&config.ppg, "PPG")?;
    let temperature = read_table(&config.temperature, "Temperature")?;

    let mut warnings = Vec::new();
    let heights = [eda.height(), ppg.height(), temperature.height()];
    let rows = heights.iter().copied().min().unwrap_or(0);
    if heights.iter().any(|&h| h != rows) {
        let msg = format!(
            "Row counts differ (EDA {}, PPG {}, Temperature {}), truncating to {}",
            heights[0], heights[1], heights[2], rows
        );
        warn!("{}", msg);
        warnings.push(msg);
    }

    let eda = eda.slice(0, rows);
    let ppg = ppg.slice(0, rows);
    let temperature = temperature.slice(0, rows);

    let mut columns: Vec<Column> = Vec::with_capacity(MERGED_COLUMNS.len());
    let mut resolved = Vec::with_capacity(TARGETS.len());
    for target in &TARGETS {
        let source = match target.source {
            Source::Eda => &eda,
            Source::Ppg => &ppg,
            Source::Temperature => &temperature,
        };
        match resolve(source, target) {
            Some((column, alias)) => {
                debug!("{} <- {:?}.{}", target.name, target.source, alias);
                columns.push(column);
                resolved.push((target.name.to_string(), Some(alias)));
            }
            None => {
                let msg = format!(
                    "No column for {} in {:?} data (tried {:?}), filling with nulls",
                    target.name, target.source, target.aliases
                );
                warn!("{}", msg);
                warnings.push(msg);
                columns.push(Series::full_null(target.name.into(), rows, &DataType::Float64).into());
                resolved.push((target.name.to_string(), None));
            }
        }
    }

    for (name, value) in [
        ("Gender", &subject.gender),
        ("BMI", &subject.bmi),
        ("Age", &subject.age),
        ("PainLevel", &subject.pain_level),
    ] {
        columns.push(Series::new(name.into(), vec![value.as_str(); rows]).into());
    }

    let mut merged = DataFrame::new(columns)?;

    if let Some(dir) = config.output.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    let mut file = File::create(&config.output)?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .finish(&mut merged)?;
    println!("Merged data saved to {}", config.output.display());

    Ok(MergeReport {
        rows,
        resolved,
        warnings,
        output: config.output.clone(),
    })
}
