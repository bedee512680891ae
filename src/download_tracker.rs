use tokio::sync::watch::channel;
use crate::download_progress::DownloadProgress;
use crate::download_receiver::DownloadReceiver;
use crate::download_sender::DownloadSender;
use crate::download_status::DownloadStatus;

pub fn new() -> (DownloadSender, DownloadReceiver) {
    let (status_sender, status_receiver) = channel(DownloadStatus::None);
    let (progress_sender, progress_receiver) = channel(DownloadProgress::default());
    let sender = DownloadSender {
        status_sender,
        progress_sender,
    };
    let receiver = DownloadReceiver {
        status_receiver,
        progress_receiver,
    };
    (sender, receiver)
}

#[cfg(test)]
mod test {
    use crate::download_progress::DownloadProgress;
    use crate::download_status::DownloadStatus;
    use crate::download_tracker;

    #[test]
    fn test_sender_reaches_receiver() {
        let (sender, receiver) = download_tracker::new();
        assert_eq!(receiver.status(), DownloadStatus::None);

        sender.send_status(DownloadStatus::Download);
        sender.send_progress(DownloadProgress {
            downloaded_length: 25,
            file_length: 100,
            segments: Vec::new(),
        });
        assert_eq!(receiver.status(), DownloadStatus::Download);
        assert_eq!(receiver.downloaded_length(), 25);
        assert_eq!(receiver.file_length(), 100);
        assert!((receiver.progress().progress() - 0.25).abs() < f64::EPSILON);
    }
}
