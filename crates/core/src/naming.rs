//! Destination folder and file name for a classified image. Pure; no I/O.

use crate::config::OrganizationConfig;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc};
use providers::folders::{is_root_path, segments};
use providers::{ClassificationResult, FileRecord, OTHER_CATEGORY};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    /// Logical folder path below the storage root, `/`-separated.
    pub folder_path: String,
    pub file_name: String,
    /// Creation time used for the year/month segments and the name date.
    pub created: DateTime<FixedOffset>,
    /// `created` is the processing time because the record had no usable timestamp.
    pub created_inferred: bool,
}

/// Parses a backend timestamp, keeping its UTC offset. Accepts RFC 3339,
/// naive ISO `YYYY-MM-DDTHH:MM:SS[.f]` (as UTC) and bare `YYYY-MM-DD`.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt);
    }
    let utc = Utc.fix();
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(utc.from_utc_datetime(&naive));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    Some(utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

/// Replaces path separators so a value stays a single folder level.
pub fn sanitize_segment(value: &str) -> String {
    value.trim().replace(['/', '\\'], "_")
}

fn label_token(label: &str) -> String {
    sanitize_segment(label).to_lowercase().replace(' ', "_")
}

fn extension(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default()
}

/// Computes where `file` goes and what it is called.
///
/// `now` stands in for a missing or unparseable creation time.
pub fn place(
    file: &FileRecord,
    classification: &ClassificationResult,
    config: &OrganizationConfig,
    destination_root: &str,
    now: DateTime<Utc>,
) -> Placement {
    let parsed = file.created_time.as_deref().and_then(parse_timestamp);
    let created_inferred = parsed.is_none();
    let created = parsed.unwrap_or_else(|| now.with_timezone(&Utc.fix()));

    let mut parts: Vec<String> = Vec::new();
    if !is_root_path(destination_root) {
        parts.extend(segments(destination_root).into_iter().map(str::to_string));
    }
    let category = sanitize_segment(&classification.category);
    parts.push(if category.is_empty() {
        OTHER_CATEGORY.to_string()
    } else {
        category
    });
    if config.include_year {
        parts.push(created.format("%Y").to_string());
        if config.include_month {
            parts.push(created.format("%B").to_string());
        }
    }

    let file_name = if config.use_original_filenames {
        file.name.clone()
    } else {
        let labels: Vec<String> = classification.labels.iter().take(2).map(|l| label_token(l)).collect();
        format!(
            "{}_{}{}",
            labels.join("_"),
            created.format("%Y%m%d"),
            extension(&file.name)
        )
    };

    Placement {
        folder_path: parts.join("/"),
        file_name,
        created,
        created_inferred,
    }
}
