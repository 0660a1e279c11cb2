use crate::error::FileFailure;
use crate::naming::Placement;
use providers::{ClassificationResult, FileRecord, FolderRecord};
use std::collections::BTreeMap;

/// Outcome of one `organize_folder` run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunResult {
    pub success_count: usize,
    pub failure_count: usize,
    /// Failure cause keyed by source file id.
    pub failures: BTreeMap<String, FileFailure>,
}

impl RunResult {
    pub fn total(&self) -> usize {
        self.success_count + self.failure_count
    }

    pub fn counts(&self) -> (usize, usize) {
        (self.success_count, self.failure_count)
    }

    /// Adds a batch's counts and failures. An id that is empty or already
    /// recorded gets a `#n` suffix, so `failures.len() == failure_count`.
    pub fn absorb(&mut self, batch: &BatchOutcome) {
        self.success_count += batch.placed.len();
        self.failure_count += batch.failures.len();
        for (id, failure) in &batch.failures {
            let key = self.unique_key(id);
            self.failures.insert(key, failure.clone());
        }
    }

    fn unique_key(&self, id: &str) -> String {
        if !id.is_empty() && !self.failures.contains_key(id) {
            return id.to_string();
        }
        (1..)
            .map(|n| format!("{id}#{n}"))
            .find(|key| !self.failures.contains_key(key))
            .unwrap_or_default()
    }
}

/// A file that was uploaded to its destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedFile {
    pub source: FileRecord,
    pub classification: ClassificationResult,
    pub placement: Placement,
    pub folder: FolderRecord,
    pub uploaded: FileRecord,
}

/// Per-file results of one batch; `placed.len() + failures.len()` equals the batch size.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub placed: Vec<PlacedFile>,
    pub failures: Vec<(String, FileFailure)>,
}

impl BatchOutcome {
    pub fn counts(&self) -> (usize, usize) {
        (self.placed.len(), self.failures.len())
    }

    pub fn total(&self) -> usize {
        self.placed.len() + self.failures.len()
    }
}

/// Classification of one listed image, without placement.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub file: FileRecord,
    pub outcome: Result<ClassificationResult, FileFailure>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_or_empty_ids_keep_every_failure() {
        let batch = BatchOutcome {
            placed: Vec::new(),
            failures: vec![
                (String::new(), FileFailure::InvalidRecord("file \"a.jpg\" has no id".into())),
                (String::new(), FileFailure::InvalidRecord("file \"b.jpg\" has no id".into())),
                ("7".into(), FileFailure::Classification),
            ],
        };
        let mut result = RunResult::default();
        result.absorb(&batch);
        result.absorb(&BatchOutcome {
            placed: Vec::new(),
            failures: vec![("7".into(), FileFailure::Download("HTTP 500".into()))],
        });

        assert_eq!(result.counts(), (0, 4));
        assert_eq!(result.failures.len(), result.failure_count);
        let keys: Vec<&str> = result.failures.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["#1", "#2", "7", "7#1"]);
        assert_eq!(result.failures["7"], FileFailure::Classification);
    }
}
