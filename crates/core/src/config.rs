use crate::error::OrganizeError;
use providers::CategoryTable;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Prefix of environment overrides, e.g. `DRIVE_ORGANIZER__ORGANIZATION__BATCH_SIZE=5`.
pub const ENV_PREFIX: &str = "DRIVE_ORGANIZER";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub recognition: RecognitionConfig,
    pub storage: StorageConfig,
    pub organization: OrganizationConfig,
    /// Category table in priority order; empty means the built-in table.
    pub categories: Vec<CategoryConfig>,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    pub provider: String,
    pub concurrency: usize,
    pub openai: OpenAiSettings,
    pub gemini: GeminiSettings,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            concurrency: 4,
            openai: OpenAiSettings::default(),
            gemini: GeminiSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiSettings {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiSettings {
    pub api_key: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub provider: String,
    pub local: LocalSettings,
    pub google_drive: GoogleDriveSettings,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: "google_drive".to_string(),
            local: LocalSettings::default(),
            google_drive: GoogleDriveSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalSettings {
    pub root: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleDriveSettings {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub token_path: Option<String>,
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrganizationConfig {
    pub include_year: bool,
    pub include_month: bool,
    pub use_original_filenames: bool,
    pub batch_size: usize,
    /// Max in-flight downloads/placements within a batch.
    pub concurrency: usize,
    /// Scratch root; the system temp dir when unset.
    pub temp_dir: Option<PathBuf>,
    pub file_timeout_secs: Option<u64>,
}

impl Default for OrganizationConfig {
    fn default() -> Self {
        Self {
            include_year: true,
            include_month: false,
            use_original_filenames: false,
            batch_size: 10,
            concurrency: 4,
            temp_dir: None,
            file_timeout_secs: None,
        }
    }
}

impl OrganizationConfig {
    pub fn validate(&self) -> Result<(), OrganizeError> {
        if self.batch_size == 0 {
            return Err(OrganizeError::Config("organization.batch_size must be greater than 0".into()));
        }
        if self.concurrency == 0 {
            return Err(OrganizeError::Config("organization.concurrency must be greater than 0".into()));
        }
        if self.file_timeout_secs == Some(0) {
            return Err(OrganizeError::Config(
                "organization.file_timeout_secs must be greater than 0 when set".into(),
            ));
        }
        Ok(())
    }

    pub fn file_timeout(&self) -> Option<Duration> {
        self.file_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryConfig {
    pub name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file (or `sqlite:` URL) of the metadata index; disabled when unset.
    pub path: Option<String>,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), OrganizeError> {
        if self.recognition.concurrency == 0 {
            return Err(OrganizeError::Config("recognition.concurrency must be greater than 0".into()));
        }
        self.organization.validate()
    }

    pub fn category_table(&self) -> CategoryTable {
        CategoryTable::from_entries(
            self.categories
                .iter()
                .map(|c| (c.name.clone(), c.keywords.clone())),
        )
    }

    /// Fills unset secrets from the conventional environment variables.
    pub fn with_env_fallbacks<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        fn fill(slot: &mut Option<String>, value: Option<String>) {
            if slot.as_deref().map_or(true, str::is_empty) {
                if let Some(value) = value.filter(|v| !v.is_empty()) {
                    *slot = Some(value);
                }
            }
        }
        let openai = &mut self.recognition.openai;
        fill(&mut openai.api_key, lookup("OPENAI_API_KEY"));
        fill(&mut openai.base_url, lookup("OPENAI_BASE_URL"));
        fill(&mut self.recognition.gemini.api_key, lookup("GEMINI_API_KEY"));
        let drive = &mut self.storage.google_drive;
        fill(&mut drive.client_id, lookup("GOOGLE_CLIENT_ID"));
        fill(&mut drive.client_secret, lookup("GOOGLE_CLIENT_SECRET"));
        fill(&mut drive.token_path, lookup("GOOGLE_TOKEN_PATH"));
        fill(&mut drive.access_token, lookup("GOOGLE_ACCESS_TOKEN"));
        self
    }
}

pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    settings = settings.add_source(
        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );
    let cfg = settings.build()?;
    let cfg: AppConfig = cfg.try_deserialize()?;
    Ok(cfg.with_env_fallbacks(|key| std::env::var(key).ok()))
}

/// Configuration written by `drive-organizer init`.
pub const DEFAULT_CONFIG_TOML: &str = r#"# drive-organizer configuration.
# Every value can be overridden with DRIVE_ORGANIZER__<SECTION>__<KEY>.

[recognition]
# gemini | openai | noop
provider = "gemini"
concurrency = 4

[recognition.gemini]
# api_key falls back to GEMINI_API_KEY
model = "gemini-2.0-flash"

[recognition.openai]
# api_key falls back to OPENAI_API_KEY
model = "gpt-4o-mini"

[storage]
# google_drive | local
provider = "google_drive"

[storage.google_drive]
# client_id / client_secret / access_token fall back to GOOGLE_* variables
token_path = "token.json"

[storage.local]
# root = "/path/to/photos"

[organization]
include_year = true
include_month = false
use_original_filenames = false
batch_size = 10
concurrency = 4
# temp_dir = "/tmp/drive-organizer"
# file_timeout_secs = 120

[database]
# path = "drive-organizer.db"

# Categories in priority order; the first whose keywords match a label wins.
# Leave out to use the built-in table.
# [[categories]]
# name = "Landscapes"
# keywords = ["mountain", "ocean", "sunset", "beach"]
"#;
