use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use crate::download_progress::DownloadProgress;
use crate::download_receiver::DownloadReceiver;
use crate::download_status::DownloadStatus;
use crate::error::DownloadError;

pub struct DownloadOperation {
    handle: Mutex<Option<JoinHandle<crate::error::Result<()>>>>,
    download_receiver: DownloadReceiver,
    cancel_token: CancellationToken,
}

impl DownloadOperation {
    pub(crate) fn new(
        handle: JoinHandle<crate::error::Result<()>>,
        download_receiver: DownloadReceiver,
        cancel_token: CancellationToken) -> DownloadOperation {
        DownloadOperation {
            handle: Mutex::new(Some(handle)),
            download_receiver,
            cancel_token,
        }
    }

    pub fn status(&self) -> DownloadStatus {
        self.download_receiver.status()
    }

    pub fn downloaded_length(&self) -> u64 {
        self.download_receiver.downloaded_length()
    }

    pub fn file_length(&self) -> u64 {
        self.download_receiver.file_length()
    }

    pub fn progress(&self) -> f64 {
        self.download_receiver.progress().progress()
    }

    pub fn download_progress(&self) -> DownloadProgress {
        self.download_receiver.progress()
    }

    pub fn receiver(&self) -> DownloadReceiver {
        self.download_receiver.clone()
    }

    pub fn is_done(&self) -> bool {
        match self.handle.lock().as_ref() {
            Some(handle) => handle.is_finished(),
            None => true,
        }
    }

    /// Written bytes stay in the record file, so a later run resumes from them.
    pub fn stop(&self) {
        self.cancel_token.cancel();
    }

    pub async fn join(&self) -> crate::error::Result<()> {
        let handle = self.handle.lock().take();
        match handle {
            Some(handle) => handle.await?,
            None => Err(DownloadError::AlreadyJoined),
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use crate::download_configuration::DownloadConfiguration;
    use crate::download_status::DownloadStatus;
    use crate::downloader::Downloader;
    use crate::transport::memory::MemoryTransport;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_operation_reports_completion() {
        let dir = tempfile::tempdir().unwrap();
        let data: Vec<u8> = (0..20_000u32).map(|i| (i % 253) as u8).collect();
        let config = DownloadConfiguration::new()
            .set_url("memory://file.bin")
            .set_file_path(dir.path().join("file.bin"))
            .set_buffer_length(2048)
            .build()
            .unwrap();
        let path = config.path.clone();

        let operation = Downloader::new(config, Arc::new(MemoryTransport::new(data.clone()))).start_download();
        operation.join().await.unwrap();

        assert!(operation.is_done());
        assert_eq!(operation.status(), DownloadStatus::Complete);
        assert_eq!(operation.downloaded_length(), data.len() as u64);
        assert_eq!(operation.file_length(), data.len() as u64);
        assert!((operation.progress() - 1f64).abs() < f64::EPSILON);
        assert_eq!(std::fs::read(path).unwrap(), data);
    }
}
