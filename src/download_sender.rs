use tokio::sync::watch::Sender;
use crate::download_progress::DownloadProgress;
use crate::download_status::DownloadStatus;

pub struct DownloadSender {
    pub status_sender: Sender<DownloadStatus>,
    pub progress_sender: Sender<DownloadProgress>,
}

impl DownloadSender {
    pub fn send_status(&self, status: DownloadStatus) {
        self.status_sender.send_replace(status);
    }

    pub fn send_progress(&self, progress: DownloadProgress) {
        self.progress_sender.send_replace(progress);
    }
}
