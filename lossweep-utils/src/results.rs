//! Reading the per-(algorithm, RTT) result files written by a sweep.
//!
//! Every row is `packet_loss, sample_1, ..., sample_k`. Rows of one file usually have the same
//! length, but a row becomes shorter whenever an invocation of the timing program was dropped,
//! and files of different runs may use different invocation counts. The reader therefore
//! accepts ragged files.

use std::{
    fs,
    path::{Path, PathBuf},
};

/// One parsed row of a result file.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub packet_loss: f64,
    pub samples: Vec<f64>,
}

/// Errors while loading result files.
#[derive(Debug, thiserror::Error)]
pub enum ResultError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV Error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Cannot parse {2:?} at line {0}, column {1}")]
    NotANumber(u64, usize, String),
    #[error("Empty row at line {0}")]
    EmptyRow(u64),
}

/// Read all rows of a single result file, in file order.
pub fn read_result_file(path: impl AsRef<Path>) -> Result<Vec<ResultRow>, ResultError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path.as_ref())?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let line = record.position().map(|p| p.line()).unwrap_or_default();
        let mut values = Vec::with_capacity(record.len());
        for (col, cell) in record.iter().enumerate() {
            let cell = cell.trim();
            let value: f64 = cell
                .parse()
                .map_err(|_| ResultError::NotANumber(line, col, cell.to_string()))?;
            values.push(value);
        }
        if values.is_empty() {
            return Err(ResultError::EmptyRow(line));
        }
        let packet_loss = values.remove(0);
        rows.push(ResultRow {
            packet_loss,
            samples: values,
        });
    }
    log::trace!("Loaded {} rows from {:?}", rows.len(), path.as_ref());
    Ok(rows)
}

/// List all `*.csv` result files in a data directory, sorted by name.
pub fn list_result_files(data_dir: impl AsRef<Path>) -> Result<Vec<PathBuf>, ResultError> {
    let mut files = fs::read_dir(data_dir.as_ref())?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "csv"))
        .collect::<Vec<_>>();
    files.sort();
    Ok(files)
}

/// Split a result file name of the form `{algorithm}_{rtt}ms.csv` into its algorithm and RTT
/// label. The algorithm itself may contain underscores, the RTT label never does.
pub fn split_file_name(path: impl AsRef<Path>) -> Option<(String, String)> {
    let stem = path.as_ref().file_stem()?.to_str()?;
    let (algorithm, rtt) = stem.rsplit_once('_')?;
    rtt.ends_with("ms")
        .then(|| (algorithm.to_string(), rtt.to_string()))
}
