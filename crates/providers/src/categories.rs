use crate::OTHER_CATEGORY;

const DEFAULT_TABLE: &[(&str, &[&str])] = &[
    ("Landscapes", &["mountain", "ocean", "sunset", "beach", "forest", "river", "waterfall", "lake"]),
    ("People", &["person", "face", "group", "crowd", "portrait", "selfie", "family"]),
    ("Food", &["meal", "dish", "restaurant", "cooking", "dinner", "lunch", "breakfast", "food"]),
    ("Animals", &["dog", "cat", "bird", "pet", "wildlife", "zoo", "farm", "animal"]),
    ("Buildings", &["building", "architecture", "house", "skyscraper", "monument", "church", "temple"]),
    ("Transportation", &["car", "vehicle", "bicycle", "motorcycle", "bus", "train", "airplane", "boat"]),
    ("Events", &["wedding", "party", "concert", "festival", "ceremony", "celebration", "conference"]),
    ("Documents", &["document", "text", "paper", "receipt", "certificate", "letter", "contract"]),
    ("Screenshots", &["screenshot", "screen", "display", "monitor", "computer", "interface", "app"]),
    ("Other", &[]),
];

/// Ordered category name -> keyword set. Earlier entries win ties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryTable {
    entries: Vec<(String, Vec<String>)>,
}

impl Default for CategoryTable {
    fn default() -> Self {
        let mut table = Self::empty();
        for (name, keywords) in DEFAULT_TABLE {
            table = table.with_category(name, keywords.iter().copied());
        }
        table
    }
}

impl CategoryTable {
    pub fn empty() -> Self {
        Self { entries: Vec::new() }
    }

    /// Appends a category, or replaces the keywords of an existing one in place.
    pub fn with_category<I, S>(mut self, name: &str, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for kw in keywords {
            let kw = normalize(kw.as_ref());
            if !kw.is_empty() && !normalized.contains(&kw) {
                normalized.push(kw);
            }
        }
        let name = name.trim().to_string();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = normalized,
            None => self.entries.push((name, normalized)),
        }
        self
    }

    /// Builds a table from configured entries; empty input yields the default table.
    pub fn from_entries<I, K, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, K)>,
        K: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut table = Self::empty();
        for (name, keywords) in entries {
            if name.trim().is_empty() {
                continue;
            }
            table = table.with_category(&name, keywords);
        }
        if table.entries.is_empty() {
            return Self::default();
        }
        table.with_other()
    }

    /// Ensures the fallback category is present (at the end).
    pub fn with_other(mut self) -> Self {
        if !self.entries.iter().any(|(n, _)| n == OTHER_CATEGORY) {
            self.entries.push((OTHER_CATEGORY.to_string(), Vec::new()));
        }
        self
    }

    /// First category in table order whose keywords intersect `labels`, else `Other`.
    pub fn categorize(&self, labels: &[String]) -> String {
        let labels: Vec<String> = labels.iter().map(|l| normalize(l)).collect();
        self.entries
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|kw| labels.contains(kw)))
            .map(|(name, _)| name.clone())
            .unwrap_or_else(|| OTHER_CATEGORY.to_string())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn keywords(&self, category: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(n, _)| n == category)
            .map(|(_, k)| k.as_slice())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}
