use crate::{CategoryTable, ClassificationResult, ProviderError, Recognizer, OTHER_CATEGORY};
use std::path::Path;

/// Offline recognizer: every image is `Other` with no labels.
#[derive(Debug, Default)]
pub struct NoopRecognizer {
    categories: CategoryTable,
}

impl NoopRecognizer {
    pub fn new(categories: CategoryTable) -> Self {
        Self { categories }
    }
}

#[async_trait::async_trait]
impl Recognizer for NoopRecognizer {
    fn name(&self) -> &str {
        "noop"
    }

    fn categories(&self) -> &CategoryTable {
        &self.categories
    }

    async fn analyze_image(&self, _image_path: &Path) -> Result<ClassificationResult, ProviderError> {
        Ok(ClassificationResult::new(OTHER_CATEGORY, Vec::new()))
    }
}
