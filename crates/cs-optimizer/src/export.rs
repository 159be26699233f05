//! Flat row, CSV and JSON exports of an iteration log.

use chrono::{DateTime, Utc};
use cs_types::{CsError, CsResult};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::log::IterationLog;
use crate::search::ParameterSearch;

/// One record flattened to column name → value. NaN serializes as `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportRow {
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub values: BTreeMap<String, Option<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation_error: Option<String>,
}

impl IterationLog {
    pub fn to_rows(&self) -> Vec<ExportRow> {
        self.to_sequence()
            .map(|record| {
                let inputs = self
                    .input_columns()
                    .iter()
                    .map(|column| (column.clone(), record.input(column)));
                let outputs = self
                    .output_columns()
                    .iter()
                    .map(|column| (column.clone(), record.output(column)));
                ExportRow {
                    index: record.iteration_index,
                    timestamp: record.timestamp,
                    values: inputs
                        .chain(outputs)
                        .map(|(column, value)| (column, value.filter(|v| !v.is_nan())))
                        .collect(),
                    evaluation_error: record.evaluation_error.clone(),
                }
            })
            .collect()
    }

    /// Header row followed by one line per record, columns
    /// `index,timestamp,<inputs>,<outputs>`.
    pub fn write_csv<W: Write>(&self, writer: W) -> CsResult<()> {
        let mut out = csv::Writer::from_writer(writer);

        let header = ["index", "timestamp"]
            .into_iter()
            .chain(self.input_columns().iter().map(String::as_str))
            .chain(self.output_columns().iter().map(String::as_str));
        out.write_record(header).map_err(export_error)?;

        for record in self.to_sequence() {
            let mut row = Vec::with_capacity(2 + self.input_columns().len() + self.output_columns().len());
            row.push(record.iteration_index.to_string());
            row.push(record.timestamp.to_rfc3339());
            for column in self.input_columns() {
                row.push(format_value(record.input(column)));
            }
            for column in self.output_columns() {
                row.push(format_value(record.output(column)));
            }
            out.write_record(&row).map_err(export_error)?;
        }

        out.flush()?;
        Ok(())
    }

    /// Write `search_output_<YYYY_mm_dd_HH_MM_SS>.csv` into `dir`, creating it
    /// if needed.
    pub fn export_csv(&self, dir: impl AsRef<Path>) -> CsResult<PathBuf> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("search_output_{}.csv", Utc::now().format("%Y_%m_%d_%H_%M_%S")));
        self.write_csv(File::create(&path)?)?;
        info!(path = %path.display(), records = self.len(), "Exported iteration log");
        Ok(path)
    }

    pub fn to_json(&self) -> CsResult<String> {
        Ok(serde_json::to_string_pretty(&self.to_rows())?)
    }
}

impl<F, E> ParameterSearch<F, E> {
    pub fn export_csv(&self, dir: impl AsRef<Path>) -> CsResult<PathBuf> {
        self.log().export_csv(dir)
    }
}

fn format_value(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn export_error(err: csv::Error) -> CsError {
    CsError::Export(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::IterationRecord;
    use std::collections::HashMap;

    fn sample_log() -> IterationLog {
        let mut log = IterationLog::new(vec!["layer_pitch".into()], vec!["b3".into(), "z_max".into()]);
        log.append(IterationRecord::new(
            0,
            HashMap::from([("layer_pitch".to_string(), 2.1)]),
            HashMap::from([("b3".to_string(), 0.25), ("z_max".to_string(), 0.3)]),
        ))
        .unwrap();
        log.append(IterationRecord::failed(
            1,
            HashMap::from([("layer_pitch".to_string(), 2.2)]),
            ["b3", "z_max"],
            "evaluation timed out after 30000 ms",
        ))
        .unwrap();
        log
    }

    #[test]
    fn csv_has_header_and_nan_cells() {
        let mut buffer = Vec::new();
        sample_log().write_csv(&mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "index,timestamp,layer_pitch,b3,z_max");
        assert!(lines[1].starts_with("0,"));
        assert!(lines[1].ends_with(",2.1,0.25,0.3"));
        assert!(lines[2].ends_with(",2.2,NaN,NaN"));
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn rows_are_flat_and_nan_free() {
        let rows = sample_log().to_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].values["b3"], Some(0.25));
        assert_eq!(rows[1].values["b3"], None);
        assert!(rows[1].evaluation_error.is_some());

        let json: serde_json::Value = serde_json::from_str(&sample_log().to_json().unwrap()).unwrap();
        assert_eq!(json[0]["index"], 0);
        assert_eq!(json[0]["layer_pitch"], 2.1);
        assert!(json[1]["z_max"].is_null());
    }

    #[test]
    fn export_writes_timestamped_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("results");
        let path = sample_log().export_csv(&target).unwrap();

        let file_name = path.file_name().unwrap().to_str().unwrap();
        assert!(file_name.starts_with("search_output_"));
        assert!(file_name.ends_with(".csv"));
        assert_eq!(file_name.len(), "search_output_".len() + "YYYY_mm_dd_HH_MM_SS".len() + ".csv".len());

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("index,timestamp,layer_pitch,b3,z_max"));
    }
}
