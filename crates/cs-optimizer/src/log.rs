//! Append-only record of completed iterations.

use chrono::{DateTime, Utc};
use cs_types::LogError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::trace;

/// Generic append-only sequence. Entries are never edited or removed.
#[derive(Debug, Clone)]
pub struct AppendLog<T> {
    entries: Vec<T>,
}

impl<T> AppendLog<T> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn push(&mut self, entry: T) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[T] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.entries.get(index)
    }

    pub fn last(&self) -> Option<&T> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for AppendLog<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// One completed step: the inputs that were applied and the outputs read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration_index: usize,
    pub input_values: HashMap<String, f64>,
    /// NaN for every criterion when the evaluation failed.
    pub output_values: HashMap<String, f64>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_error: Option<String>,
}

impl IterationRecord {
    pub fn new(
        iteration_index: usize,
        input_values: HashMap<String, f64>,
        output_values: HashMap<String, f64>,
    ) -> Self {
        Self {
            iteration_index,
            input_values,
            output_values,
            timestamp: Utc::now(),
            evaluation_error: None,
        }
    }

    /// Record for a step whose evaluation failed: every output is NaN.
    pub fn failed<'a>(
        iteration_index: usize,
        input_values: HashMap<String, f64>,
        output_names: impl IntoIterator<Item = &'a str>,
        error: impl Into<String>,
    ) -> Self {
        let output_values = output_names
            .into_iter()
            .map(|name| (name.to_string(), f64::NAN))
            .collect();
        Self {
            evaluation_error: Some(error.into()),
            ..Self::new(iteration_index, input_values, output_values)
        }
    }

    pub fn is_valid(&self) -> bool {
        self.evaluation_error.is_none()
    }

    pub fn input(&self, name: &str) -> Option<f64> {
        self.input_values.get(name).copied()
    }

    pub fn output(&self, name: &str) -> Option<f64> {
        self.output_values.get(name).copied()
    }
}

/// Ordered log of iteration records with a fixed column schema.
#[derive(Debug, Clone)]
pub struct IterationLog {
    input_columns: Vec<String>,
    output_columns: Vec<String>,
    records: AppendLog<IterationRecord>,
}

impl IterationLog {
    pub fn new(input_columns: Vec<String>, output_columns: Vec<String>) -> Self {
        Self {
            input_columns,
            output_columns,
            records: AppendLog::new(),
        }
    }

    /// Index the next appended record must carry.
    pub fn next_index(&self) -> usize {
        self.records.len()
    }

    pub fn append(&mut self, record: IterationRecord) -> Result<(), LogError> {
        let expected = self.next_index();
        if record.iteration_index != expected {
            return Err(LogError::DuplicateIteration {
                expected,
                actual: record.iteration_index,
            });
        }
        self.check_schema(&record)?;
        trace!(iteration = record.iteration_index, valid = record.is_valid(), "Appending record");
        self.records.push(record);
        Ok(())
    }

    fn check_schema(&self, record: &IterationRecord) -> Result<(), LogError> {
        let mismatch = |message: String| LogError::SchemaMismatch {
            iteration: record.iteration_index,
            message,
        };
        if record.input_values.len() != self.input_columns.len() {
            return Err(mismatch(format!(
                "{} inputs, expected {}",
                record.input_values.len(),
                self.input_columns.len()
            )));
        }
        if record.output_values.len() != self.output_columns.len() {
            return Err(mismatch(format!(
                "{} outputs, expected {}",
                record.output_values.len(),
                self.output_columns.len()
            )));
        }
        if let Some(column) = self.input_columns.iter().find(|c| !record.input_values.contains_key(*c)) {
            return Err(mismatch(format!("missing input '{column}'")));
        }
        if let Some(column) = self.output_columns.iter().find(|c| !record.output_values.contains_key(*c)) {
            return Err(mismatch(format!("missing output '{column}'")));
        }
        Ok(())
    }

    /// Records in append order.
    pub fn to_sequence(&self) -> std::slice::Iter<'_, IterationRecord> {
        self.records.entries().iter()
    }

    pub fn records(&self) -> &[IterationRecord] {
        self.records.entries()
    }

    /// Record with the best valid value of `criterion`. NaN values are
    /// skipped and ties resolve to the earliest record.
    pub fn best_by(&self, criterion: &str, minimize: bool) -> Result<&IterationRecord, LogError> {
        if self.records.is_empty() {
            return Err(LogError::EmptyLog);
        }
        if !self.output_columns.iter().any(|c| c == criterion) {
            return Err(LogError::UnknownCriterion {
                criterion: criterion.to_string(),
            });
        }

        let mut best: Option<(&IterationRecord, f64)> = None;
        for record in self.to_sequence() {
            let Some(value) = record.output(criterion).filter(|v| !v.is_nan()) else {
                continue;
            };
            let improves = match best {
                None => true,
                Some((_, current)) if minimize => value < current,
                Some((_, current)) => value > current,
            };
            if improves {
                best = Some((record, value));
            }
        }

        best.map(|(record, _)| record).ok_or_else(|| LogError::NoValidValue {
            criterion: criterion.to_string(),
        })
    }

    pub fn get(&self, index: usize) -> Option<&IterationRecord> {
        self.records.get(index)
    }

    pub fn last(&self) -> Option<&IterationRecord> {
        self.records.last()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records whose evaluation succeeded.
    pub fn valid_count(&self) -> usize {
        self.to_sequence().filter(|r| r.is_valid()).count()
    }

    pub fn input_columns(&self) -> &[String] {
        &self.input_columns
    }

    pub fn output_columns(&self) -> &[String] {
        &self.output_columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(index: usize, pitch: f64, b3: f64) -> IterationRecord {
        IterationRecord::new(
            index,
            HashMap::from([("layer_pitch".to_string(), pitch)]),
            HashMap::from([("b3".to_string(), b3)]),
        )
    }

    fn log() -> IterationLog {
        IterationLog::new(vec!["layer_pitch".into()], vec!["b3".into()])
    }

    #[test]
    fn append_requires_contiguous_indices() {
        let mut log = log();
        log.append(record(0, 2.0, 0.5)).unwrap();
        let err = log.append(record(0, 2.1, 0.4)).unwrap_err();
        assert_eq!(err, LogError::DuplicateIteration { expected: 1, actual: 0 });
        assert!(log.append(record(2, 2.1, 0.4)).is_err());
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn append_checks_columns() {
        let mut log = log();
        let wrong = IterationRecord::new(
            0,
            HashMap::from([("winding".to_string(), 1.0)]),
            HashMap::from([("b3".to_string(), 0.1)]),
        );
        assert!(matches!(log.append(wrong), Err(LogError::SchemaMismatch { iteration: 0, .. })));
        assert!(log.is_empty());
    }

    #[test]
    fn best_by_skips_nan_and_prefers_earliest() {
        let mut log = log();
        log.append(record(0, 2.0, 0.3)).unwrap();
        log.append(IterationRecord::failed(
            1,
            HashMap::from([("layer_pitch".to_string(), 2.05)]),
            ["b3"],
            "solver diverged",
        ))
        .unwrap();
        log.append(record(2, 2.1, 0.1)).unwrap();
        log.append(record(3, 2.2, 0.1)).unwrap();

        assert_eq!(log.best_by("b3", true).unwrap().iteration_index, 2);
        assert_eq!(log.best_by("b3", false).unwrap().iteration_index, 0);
        assert_eq!(log.valid_count(), 3);
    }

    #[test]
    fn best_by_errors() {
        let mut log = log();
        assert_eq!(log.best_by("b3", true).unwrap_err(), LogError::EmptyLog);

        log.append(IterationRecord::failed(
            0,
            HashMap::from([("layer_pitch".to_string(), 2.0)]),
            ["b3"],
            "timeout",
        ))
        .unwrap();
        assert!(matches!(log.best_by("b5", true), Err(LogError::UnknownCriterion { .. })));
        assert!(matches!(log.best_by("b3", true), Err(LogError::NoValidValue { .. })));
    }

    #[test]
    fn failed_record_has_nan_outputs() {
        let record = IterationRecord::failed(4, HashMap::new(), ["b3", "z_max"], "timeout");
        assert!(!record.is_valid());
        assert!(record.output("b3").unwrap().is_nan());
        assert!(record.output("z_max").unwrap().is_nan());
    }

    #[test]
    fn sequence_preserves_order() {
        let mut log = log();
        for i in 0..5 {
            log.append(record(i, 2.0 + i as f64 * 0.01, 0.0)).unwrap();
        }
        let indices: Vec<usize> = log.to_sequence().map(|r| r.iteration_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        assert_eq!(log.last().unwrap().iteration_index, 4);
    }
}
