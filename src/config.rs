use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    pub index: IndexConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub annotation: Option<AnnotationConfig>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub snapshot: Option<SnapshotConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub bucket: String,
    pub region: String,
    /// Override for S3-compatible services (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Hostname of the search domain, without scheme.
    pub domain: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TransferConfig {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Cap on pages consumed per run; unset means the whole index.
    #[serde(default)]
    pub pages: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_group_size")]
    pub group_size: usize,
    /// Byte span fetched per range read during import.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Smallest part the storage service accepts for a multipart upload.
    #[serde(default = "default_min_part_size")]
    pub min_part_size: usize,
    /// Hard cap on the import decode buffer.
    #[serde(default = "default_max_buffer_bytes")]
    pub max_buffer_bytes: usize,
    /// When true, per-item bulk failures abort the run.
    #[serde(default)]
    pub bulk_errors_fatal: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            pages: None,
            batch_size: default_batch_size(),
            group_size: default_group_size(),
            chunk_size: default_chunk_size(),
            min_part_size: default_min_part_size(),
            max_buffer_bytes: default_max_buffer_bytes(),
            bulk_errors_fatal: false,
        }
    }
}

fn default_page_size() -> usize {
    10_000
}
fn default_batch_size() -> usize {
    50
}
fn default_group_size() -> usize {
    4
}
fn default_chunk_size() -> usize {
    8_388_608
}
fn default_min_part_size() -> usize {
    5_242_880
}
fn default_max_buffer_bytes() -> usize {
    268_435_456
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnnotationConfig {
    pub endpoint: String,
    /// Source field holding the text to annotate.
    pub field: String,
    #[serde(default = "default_confidence_thresholds")]
    pub confidence_thresholds: Vec<f64>,
    #[serde(default = "default_entity_field")]
    pub entity_field: String,
    #[serde(default = "default_include_metadata")]
    pub include_metadata: bool,
}

fn default_confidence_thresholds() -> Vec<f64> {
    vec![0.1, 0.6]
}
fn default_entity_field() -> String {
    "linked_entities".to_string()
}
fn default_include_metadata() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_retry_attempts(),
            delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_retry_attempts() -> u32 {
    10
}
fn default_retry_delay_ms() -> u64 {
    5000
}

/// When present, a snapshot is triggered before destructive runs.
#[derive(Debug, Deserialize, Clone)]
pub struct SnapshotConfig {
    pub repository: String,
    pub snapshot: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate transfer
    if config.transfer.page_size == 0 {
        anyhow::bail!("transfer.page_size must be > 0");
    }
    if config.transfer.batch_size == 0 || config.transfer.group_size == 0 {
        anyhow::bail!("transfer.batch_size and transfer.group_size must be > 0");
    }
    if config.transfer.chunk_size == 0 {
        anyhow::bail!("transfer.chunk_size must be > 0");
    }
    if config.transfer.max_buffer_bytes < config.transfer.chunk_size {
        anyhow::bail!("transfer.max_buffer_bytes must be >= transfer.chunk_size");
    }

    // Validate annotation
    if let Some(annotation) = &config.annotation {
        if annotation.confidence_thresholds.is_empty() {
            anyhow::bail!("annotation.confidence_thresholds must not be empty");
        }
        for &threshold in &annotation.confidence_thresholds {
            if !(0.0..=1.0).contains(&threshold) {
                anyhow::bail!(
                    "annotation.confidence_thresholds entries must be in [0.0, 1.0], got {}",
                    threshold
                );
            }
        }
        if annotation.field.is_empty() {
            anyhow::bail!("annotation.field must not be empty");
        }
    }

    if config.retry.attempts == 0 {
        anyhow::bail!("retry.attempts must be >= 1");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn minimal_config_fills_defaults() {
        let file = write_config(
            r#"
[storage]
bucket = "dumps"
region = "eu-central-1"

[index]
domain = "search.example.com"
"#,
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.transfer.page_size, 10_000);
        assert_eq!(config.transfer.batch_size, 50);
        assert_eq!(config.transfer.group_size, 4);
        assert_eq!(config.transfer.min_part_size, 5_242_880);
        assert_eq!(config.retry.attempts, 10);
        assert!(config.annotation.is_none());
        assert!(config.snapshot.is_none());
    }

    #[test]
    fn annotation_defaults_apply() {
        let file = write_config(
            r#"
[storage]
bucket = "dumps"
region = "eu-central-1"

[index]
domain = "search.example.com"

[annotation]
endpoint = "http://localhost:2222/rest/annotate"
field = "abstract"
"#,
        );
        let config = load_config(file.path()).unwrap();
        let annotation = config.annotation.unwrap();
        assert_eq!(annotation.confidence_thresholds, vec![0.1, 0.6]);
        assert_eq!(annotation.entity_field, "linked_entities");
        assert!(annotation.include_metadata);
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let file = write_config(
            r#"
[storage]
bucket = "dumps"
region = "eu-central-1"

[index]
domain = "search.example.com"

[annotation]
endpoint = "http://localhost:2222/rest/annotate"
field = "abstract"
confidence_thresholds = [0.5, 1.5]
"#,
        );
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn buffer_cap_must_cover_chunk_size() {
        let file = write_config(
            r#"
[storage]
bucket = "dumps"
region = "eu-central-1"

[index]
domain = "search.example.com"

[transfer]
chunk_size = 1048576
max_buffer_bytes = 1024
"#,
        );
        assert!(load_config(file.path()).is_err());
    }
}
