//! Human and JSON renderings of command results.

use organizer_core::{Analysis, RunResult};
use serde_json::{json, Value};
use storage::ImageRecord;

pub fn run_summary_json(result: &RunResult, source: &str, destination: &str) -> Value {
    let failures: Vec<Value> = result
        .failures
        .iter()
        .map(|(id, failure)| json!({ "id": id, "reason": failure.to_string() }))
        .collect();
    json!({
        "status": "ok",
        "source": source,
        "destination": destination,
        "succeeded": result.success_count,
        "failed": result.failure_count,
        "failures": failures,
    })
}

pub fn run_summary_lines(result: &RunResult) -> Vec<String> {
    let mut lines = vec![format!(
        "organized {} of {} images ({} failed)",
        result.success_count,
        result.total(),
        result.failure_count
    )];
    lines.extend(
        result
            .failures
            .iter()
            .map(|(id, failure)| format!("  {id}: {failure}")),
    );
    lines
}

pub fn analysis_line(analysis: &Analysis) -> String {
    match &analysis.outcome {
        Ok(result) if result.labels.is_empty() => format!("{}: {}", analysis.file.name, result.category),
        Ok(result) => format!(
            "{}: {} [{}]",
            analysis.file.name,
            result.category,
            result.labels.join(", ")
        ),
        Err(failure) => format!("{}: failed ({failure})", analysis.file.name),
    }
}

pub fn image_line(image: &ImageRecord) -> String {
    format!(
        "{}\t{}\t{}/{}\t{}",
        image.id,
        image.category,
        image.destination_path,
        image.uploaded_name,
        image.labels.join(",")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use organizer_core::FileFailure;
    use providers::{ClassificationResult, FileRecord};

    fn result() -> RunResult {
        let mut result = RunResult {
            success_count: 2,
            failure_count: 1,
            ..Default::default()
        };
        result
            .failures
            .insert("id-9".into(), FileFailure::Download("HTTP 404".into()));
        result
    }

    #[test]
    fn json_summary_lists_failures() {
        let value = run_summary_json(&result(), "Inbox", "Sorted");
        assert_eq!(value["succeeded"], 2);
        assert_eq!(value["failed"], 1);
        assert_eq!(value["failures"][0]["id"], "id-9");
        assert_eq!(value["failures"][0]["reason"], "download failed: HTTP 404");
    }

    #[test]
    fn text_summary() {
        let lines = run_summary_lines(&result());
        assert_eq!(lines[0], "organized 2 of 3 images (1 failed)");
        assert_eq!(lines[1], "  id-9: download failed: HTTP 404");
    }

    #[test]
    fn analysis_lines() {
        let ok = Analysis {
            file: FileRecord::new("1", "a.jpg"),
            outcome: Ok(ClassificationResult::new("Animals", vec!["dog".into(), "grass".into()])),
        };
        assert_eq!(analysis_line(&ok), "a.jpg: Animals [dog, grass]");
        let failed = Analysis {
            file: FileRecord::new("2", "b.jpg"),
            outcome: Err(FileFailure::Classification),
        };
        assert_eq!(analysis_line(&failed), "b.jpg: failed (image could not be classified)");
    }
}
