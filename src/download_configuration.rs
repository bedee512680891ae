use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use crate::error::DownloadError;
use crate::file_writer::WriteOrder;

pub const DEFAULT_BUFFER_LENGTH: usize = 64 * 1024;
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_THREAD_COUNT: usize = 10;
pub const DEFAULT_CONTROL_SWITCH_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_SEGMENT_PAUSE_IDLE: Duration = Duration::from_secs(10);
pub const DEFAULT_SEGMENT_HEALTHY_IDLE: Duration = Duration::from_millis(600);
pub const RECORD_FILE_EXTENSION: &str = "dlrecord";

pub struct DownloadConfiguration {
    pub url: Arc<String>,
    pub path: PathBuf,
    pub record_file_path: PathBuf,
    pub buffer_length: usize,
    pub step_timeout: Duration,
    pub max_thread_count: usize,
    pub control_switch_interval: Duration,
    pub retry_delay: Duration,
    pub segment_pause_idle: Duration,
    pub segment_healthy_idle: Duration,
    pub write_order: WriteOrder,
    pub remote_file_hash: u64,
    pub keep_record_file: bool,
}

pub struct DownloadConfigurationBuilder {
    url: Option<String>,
    path: Option<PathBuf>,
    record_file_path: Option<PathBuf>,
    buffer_length: usize,
    step_timeout: Duration,
    max_thread_count: usize,
    control_switch_interval: Duration,
    retry_delay: Duration,
    segment_pause_idle: Duration,
    segment_healthy_idle: Duration,
    write_order: WriteOrder,
    remote_file_hash: u64,
    keep_record_file: bool,
    create_dir: bool,
}

impl DownloadConfigurationBuilder {
    pub fn set_url(mut self, url: impl Into<String>) -> DownloadConfigurationBuilder {
        self.url = Some(url.into());
        self
    }

    pub fn set_file_path(mut self, path: impl Into<PathBuf>) -> DownloadConfigurationBuilder {
        self.path = Some(path.into());
        self
    }

    pub fn set_record_file_path(mut self, path: impl Into<PathBuf>) -> DownloadConfigurationBuilder {
        self.record_file_path = Some(path.into());
        self
    }

    pub fn set_buffer_length(mut self, buffer_length: usize) -> DownloadConfigurationBuilder {
        self.buffer_length = buffer_length.max(1);
        self
    }

    pub fn set_step_timeout(mut self, step_timeout: Duration) -> DownloadConfigurationBuilder {
        self.step_timeout = step_timeout;
        self
    }

    pub fn set_max_thread_count(mut self, max_thread_count: usize) -> DownloadConfigurationBuilder {
        self.max_thread_count = max_thread_count.max(1);
        self
    }

    pub fn set_control_switch_interval(mut self, interval: Duration) -> DownloadConfigurationBuilder {
        self.control_switch_interval = interval;
        self
    }

    pub fn set_retry_delay(mut self, retry_delay: Duration) -> DownloadConfigurationBuilder {
        self.retry_delay = retry_delay;
        self
    }

    pub fn set_segment_pause_idle(mut self, idle: Duration) -> DownloadConfigurationBuilder {
        self.segment_pause_idle = idle;
        self
    }

    pub fn set_segment_healthy_idle(mut self, idle: Duration) -> DownloadConfigurationBuilder {
        self.segment_healthy_idle = idle;
        self
    }

    pub fn set_write_order(mut self, write_order: WriteOrder) -> DownloadConfigurationBuilder {
        self.write_order = write_order;
        self
    }

    /// xxHash64 (seed 0) of the complete file; 0 skips verification.
    pub fn set_remote_file_hash(mut self, hash: u64) -> DownloadConfigurationBuilder {
        self.remote_file_hash = hash;
        self
    }

    pub fn set_keep_record_file(mut self, keep: bool) -> DownloadConfigurationBuilder {
        self.keep_record_file = keep;
        self
    }

    pub fn create_dir(mut self, create: bool) -> DownloadConfigurationBuilder {
        self.create_dir = create;
        self
    }

    pub fn build(self) -> crate::error::Result<DownloadConfiguration> {
        let url = match self.url {
            Some(url) if !url.trim().is_empty() => url,
            _ => return Err(DownloadError::EmptyUrl),
        };
        let path = match self.path {
            Some(path) if !path.as_os_str().is_empty() => path,
            _ => return Err(DownloadError::EmptyFilePath),
        };

        if self.create_dir {
            create_parent_dir(&path)?;
        }

        let record_file_path = self.record_file_path.unwrap_or_else(|| default_record_file_path(&path));

        Ok(DownloadConfiguration {
            url: Arc::new(url),
            path,
            record_file_path,
            buffer_length: self.buffer_length,
            step_timeout: self.step_timeout,
            max_thread_count: self.max_thread_count,
            control_switch_interval: self.control_switch_interval,
            retry_delay: self.retry_delay,
            segment_pause_idle: self.segment_pause_idle,
            segment_healthy_idle: self.segment_healthy_idle,
            write_order: self.write_order,
            remote_file_hash: self.remote_file_hash,
            keep_record_file: self.keep_record_file,
        })
    }
}

fn create_parent_dir(path: &Path) -> crate::error::Result<()> {
    if let Some(directory) = path.parent() {
        if !directory.as_os_str().is_empty() && !directory.exists() {
            fs::create_dir_all(directory)?;
        }
    }
    Ok(())
}

fn default_record_file_path(path: &Path) -> PathBuf {
    let mut record = path.as_os_str().to_owned();
    record.push(".");
    record.push(RECORD_FILE_EXTENSION);
    PathBuf::from(record)
}

impl DownloadConfiguration {
    pub fn new() -> DownloadConfigurationBuilder {
        DownloadConfigurationBuilder {
            url: None,
            path: None,
            record_file_path: None,
            buffer_length: DEFAULT_BUFFER_LENGTH,
            step_timeout: DEFAULT_STEP_TIMEOUT,
            max_thread_count: DEFAULT_MAX_THREAD_COUNT,
            control_switch_interval: DEFAULT_CONTROL_SWITCH_INTERVAL,
            retry_delay: DEFAULT_RETRY_DELAY,
            segment_pause_idle: DEFAULT_SEGMENT_PAUSE_IDLE,
            segment_healthy_idle: DEFAULT_SEGMENT_HEALTHY_IDLE,
            write_order: WriteOrder::OrderFirst,
            remote_file_hash: 0,
            keep_record_file: false,
            create_dir: false,
        }
    }
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;
    use crate::download_configuration::{DownloadConfiguration, DEFAULT_MAX_THREAD_COUNT};
    use crate::error::DownloadError;

    #[test]
    fn test_build_defaults() {
        let config = DownloadConfiguration::new()
            .set_url("https://example.com/file.bin")
            .set_file_path("temp/file.bin")
            .build()
            .unwrap();
        assert_eq!(config.record_file_path, PathBuf::from("temp/file.bin.dlrecord"));
        assert_eq!(config.max_thread_count, DEFAULT_MAX_THREAD_COUNT);
        assert!(!config.keep_record_file);
    }

    #[test]
    fn test_build_rejects_missing_fields() {
        let result = DownloadConfiguration::new().set_file_path("a.bin").build();
        assert!(matches!(result, Err(DownloadError::EmptyUrl)));

        let result = DownloadConfiguration::new().set_url("  ").set_file_path("a.bin").build();
        assert!(matches!(result, Err(DownloadError::EmptyUrl)));

        let result = DownloadConfiguration::new().set_url("https://example.com").build();
        assert!(matches!(result, Err(DownloadError::EmptyFilePath)));
    }

    #[test]
    fn test_create_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("file.bin");
        DownloadConfiguration::new()
            .set_url("https://example.com")
            .set_file_path(&path)
            .create_dir(true)
            .build()
            .unwrap();
        assert!(path.parent().unwrap().is_dir());
    }
}
