use tokio::sync::watch::Receiver;
use crate::download_progress::DownloadProgress;
use crate::download_status::DownloadStatus;

#[derive(Clone)]
pub struct DownloadReceiver {
    pub status_receiver: Receiver<DownloadStatus>,
    pub progress_receiver: Receiver<DownloadProgress>,
}

impl DownloadReceiver {
    pub fn status(&self) -> DownloadStatus {
        *self.status_receiver.borrow()
    }

    pub fn progress(&self) -> DownloadProgress {
        self.progress_receiver.borrow().clone()
    }

    pub fn downloaded_length(&self) -> u64 {
        self.progress_receiver.borrow().downloaded_length
    }

    pub fn file_length(&self) -> u64 {
        self.progress_receiver.borrow().file_length
    }
}
