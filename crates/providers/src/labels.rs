//! Prompt and reply parsing shared by the LLM-backed recognizers.

/// Upper bound on labels kept from one model reply.
pub const DEFAULT_MAX_LABELS: usize = 20;

pub const LABEL_PROMPT: &str = "List the main objects, scenes and subjects visible in this image \
as a single comma-separated list of short lowercase labels (one or two words each), \
most prominent first. Reply with the list only.";

/// Splits a model reply into normalized labels: commas and newlines separate
/// entries, list markers and quotes are stripped, duplicates dropped.
pub fn parse_labels(text: &str, max: usize) -> Vec<String> {
    let mut labels: Vec<String> = Vec::new();
    for raw in text.split(|c| c == ',' || c == '\n' || c == ';') {
        let label = normalize_label(raw);
        if label.is_empty() || labels.contains(&label) {
            continue;
        }
        labels.push(label);
        if labels.len() == max {
            break;
        }
    }
    labels
}

pub fn normalize_label(raw: &str) -> String {
    let trimmed = strip_list_marker(raw.trim())
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c == '.');
    trimmed.trim().to_lowercase()
}

// "- x", "* x", "• x", "3. x", "3) x"
fn strip_list_marker(s: &str) -> &str {
    let bullets = s.trim_start_matches(|c: char| c == '-' || c == '*' || c == '•');
    if bullets.len() != s.len() {
        return bullets;
    }
    let digits = s.trim_start_matches(|c: char| c.is_ascii_digit());
    if digits.len() != s.len() {
        if let Some(rest) = digits.strip_prefix('.').or_else(|| digits.strip_prefix(')')) {
            return rest;
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comma_separated_reply() {
        assert_eq!(
            parse_labels("Beach, Sunset , ocean.", 10),
            vec!["beach", "sunset", "ocean"]
        );
    }

    #[test]
    fn bulleted_reply() {
        let reply = "1. Dog\n2. Grass\n- dog\n* \"Ball\"";
        assert_eq!(parse_labels(reply, 10), vec!["dog", "grass", "ball"]);
    }

    #[test]
    fn leading_digits_without_marker_are_kept() {
        assert_eq!(parse_labels("4x4 truck", 10), vec!["4x4 truck"]);
    }

    #[test]
    fn respects_max() {
        assert_eq!(parse_labels("a, b, c, d", 2), vec!["a", "b"]);
    }

    #[test]
    fn empty_reply() {
        assert!(parse_labels("  \n , ", 5).is_empty());
    }
}
