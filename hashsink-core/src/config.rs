use crate::backend::{Backend, ObjectStoreBackend};
use crate::error::{SinkError, SinkResult};
use crate::retry::RetryPolicy;
use crate::sink::SinkOptions;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Storage backend selection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    #[default]
    Memory,
    Local {
        root: PathBuf,
    },
    Gcs {
        #[serde(default)]
        project_id: String,
        #[serde(default)]
        key_filename: String,
    },
    S3 {
        region: String,
        #[serde(default)]
        endpoint: Option<String>,
        #[serde(default)]
        access_key_id: Option<String>,
        #[serde(default)]
        secret_access_key: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_retry_attempts(),
            backoff_ms: default_retry_backoff_ms(),
        }
    }
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    50
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            event_capacity: default_event_capacity(),
        }
    }
}

fn default_channel_capacity() -> usize {
    16
}

fn default_event_capacity() -> usize {
    64
}

impl SinkConfig {
    pub fn new(bucket: impl Into<String>, backend: BackendConfig) -> Self {
        Self {
            bucket: bucket.into(),
            backend,
            retry: RetryConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }

    /// Loads the configuration from a file, overridden by `HASHSINK_`
    /// environment variables (`HASHSINK_RETRY__ATTEMPTS=5`).
    pub fn from_file(path: &str) -> SinkResult<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(::config::Environment::with_prefix("HASHSINK").separator("__"))
            .build()?;

        let config: SinkConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SinkResult<()> {
        if self.bucket.trim().is_empty() {
            return Err(SinkError::Config(
                "\"bucket\" string must be provided".to_string(),
            ));
        }

        match &self.backend {
            BackendConfig::Gcs {
                project_id,
                key_filename,
            } => {
                if project_id.trim().is_empty() {
                    return Err(SinkError::Config(
                        "\"projectId\" string must be provided".to_string(),
                    ));
                }
                if key_filename.trim().is_empty() {
                    return Err(SinkError::Config(
                        "\"keyFilename\" string must be provided".to_string(),
                    ));
                }
            }
            BackendConfig::S3 { region, .. } if region.trim().is_empty() => {
                return Err(SinkError::Config(
                    "\"region\" string must be provided".to_string(),
                ));
            }
            _ => {}
        }

        if self.retry.attempts == 0 {
            return Err(SinkError::Config(
                "retry.attempts must be at least 1".to_string(),
            ));
        }
        if self.pipeline.channel_capacity == 0 || self.pipeline.event_capacity == 0 {
            return Err(SinkError::Config(
                "pipeline capacities must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn options(&self) -> SinkOptions {
        SinkOptions {
            retry: RetryPolicy::new(
                self.retry.attempts,
                Duration::from_millis(self.retry.backoff_ms),
            ),
            channel_capacity: self.pipeline.channel_capacity,
            event_capacity: self.pipeline.event_capacity,
        }
    }

    pub fn build_backend(&self) -> SinkResult<Arc<dyn Backend>> {
        self.validate()?;
        let bucket = self.bucket.trim();

        let backend = match &self.backend {
            BackendConfig::Memory => ObjectStoreBackend::memory(bucket),
            BackendConfig::Local { root } => ObjectStoreBackend::local(root, bucket)?,
            BackendConfig::Gcs {
                project_id,
                key_filename,
            } => {
                tracing::info!("Using GCS bucket {} in project {}", bucket, project_id);
                ObjectStoreBackend::gcs(bucket, key_filename)?
            }
            BackendConfig::S3 {
                region,
                endpoint,
                access_key_id,
                secret_access_key,
            } => {
                let credentials = access_key_id
                    .as_deref()
                    .zip(secret_access_key.as_deref());
                ObjectStoreBackend::s3(bucket, region, endpoint.as_deref(), credentials)?
            }
        };

        Ok(Arc::new(backend))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_from_file_with_defaults() {
        let file = write_config(
            r#"
            bucket = "assets"

            [backend]
            type = "local"
            root = "/var/lib/hashsink"
            "#,
        );

        let config = SinkConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.bucket, "assets");
        assert!(matches!(
            config.backend,
            BackendConfig::Local { ref root } if root == &PathBuf::from("/var/lib/hashsink")
        ));
        assert_eq!(config.retry.attempts, 3);
        assert_eq!(config.retry.backoff_ms, 50);
        assert_eq!(config.pipeline.channel_capacity, 16);
        assert_eq!(config.pipeline.event_capacity, 64);
    }

    #[test]
    fn test_from_file_gcs() {
        let file = write_config(
            r#"
            bucket = "assets"

            [backend]
            type = "gcs"
            project_id = "my-project"
            key_filename = "/etc/keys/sa.json"

            [retry]
            attempts = 5
            "#,
        );

        let config = SinkConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.retry.attempts, 5);
        assert_eq!(config.retry.backoff_ms, 50);
        assert!(matches!(config.backend, BackendConfig::Gcs { .. }));
    }

    #[test]
    fn test_missing_bucket_is_rejected() {
        let file = write_config(
            r#"
            [backend]
            type = "memory"
            "#,
        );

        let err = SinkConfig::from_file(file.path().to_str().unwrap()).unwrap_err();
        assert_eq!(
            err,
            SinkError::Config("\"bucket\" string must be provided".to_string())
        );
    }

    #[test]
    fn test_gcs_requires_project_and_key() {
        let mut config = SinkConfig::new(
            "assets",
            BackendConfig::Gcs {
                project_id: String::new(),
                key_filename: "/etc/keys/sa.json".to_string(),
            },
        );
        assert!(matches!(config.validate(), Err(SinkError::Config(msg)) if msg.contains("projectId")));

        config.backend = BackendConfig::Gcs {
            project_id: "my-project".to_string(),
            key_filename: " ".to_string(),
        };
        assert!(matches!(config.validate(), Err(SinkError::Config(msg)) if msg.contains("keyFilename")));
    }

    #[test]
    fn test_zero_capacities_are_rejected() {
        let mut config = SinkConfig::new("assets", BackendConfig::Memory);
        config.pipeline.channel_capacity = 0;
        assert!(matches!(config.validate(), Err(SinkError::Config(_))));
    }

    #[test]
    fn test_options_follow_config() {
        let mut config = SinkConfig::new("assets", BackendConfig::Memory);
        config.retry.backoff_ms = 10;
        config.pipeline.channel_capacity = 4;

        let options = config.options();
        assert_eq!(options.retry.attempts, 3);
        assert_eq!(options.retry.backoff, Duration::from_millis(10));
        assert_eq!(options.channel_capacity, 4);
        assert_eq!(options.event_capacity, 64);
    }

    #[test]
    fn test_build_local_backend() {
        let root = tempfile::tempdir().unwrap();
        let config = SinkConfig::new(
            "assets",
            BackendConfig::Local {
                root: root.path().to_path_buf(),
            },
        );

        let backend = config.build_backend().unwrap();
        assert_eq!(backend.name(), "assets");
    }
}
