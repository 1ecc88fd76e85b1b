use anyhow::{Context, Result};
use polars::prelude::*;
use std::path::PathBuf;

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 2 {
        println!("Usage: {} <csv_file>", args[0]);
        std::process::exit(1);
    }

    let path = PathBuf::from(&args[1]);
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.clone()))?
        .finish()
        .with_context(|| format!("Cannot read {}", path.display()))?;

    println!("\nShape: {:?}", df.shape());
    println!("\nColumns:");
    for column in df.get_columns() {
        println!("  {}: {}", column.name(), column.dtype());
    }
    println!("\n{}", df.head(Some(5)));

    Ok(())
}
