use std::fmt::{Display, Formatter};

#[derive(PartialEq, Eq, Clone, Copy, Debug, Default)]
pub enum DownloadStatus {
    #[default]
    None,
    Probe,
    Download,
    Flush,
    FileVerify,
    Complete,
    Failed,
    Stop,
}

impl DownloadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DownloadStatus::Complete | DownloadStatus::Failed | DownloadStatus::Stop)
    }
}

impl Display for DownloadStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DownloadStatus::None => write!(f, "None"),
            DownloadStatus::Probe => write!(f, "Probe"),
            DownloadStatus::Download => write!(f, "Download"),
            DownloadStatus::Flush => write!(f, "Flush"),
            DownloadStatus::FileVerify => write!(f, "FileVerify"),
            DownloadStatus::Complete => write!(f, "Complete"),
            DownloadStatus::Failed => write!(f, "Failed"),
            DownloadStatus::Stop => write!(f, "Stop"),
        }
    }
}

impl From<DownloadStatus> for u8 {
    fn from(status: DownloadStatus) -> u8 {
        match status {
            DownloadStatus::None => 0,
            DownloadStatus::Probe => 1,
            DownloadStatus::Download => 2,
            DownloadStatus::Flush => 3,
            DownloadStatus::FileVerify => 4,
            DownloadStatus::Complete => 5,
            DownloadStatus::Failed => 6,
            DownloadStatus::Stop => 7,
        }
    }
}

impl From<u8> for DownloadStatus {
    fn from(value: u8) -> Self {
        match value {
            1 => DownloadStatus::Probe,
            2 => DownloadStatus::Download,
            3 => DownloadStatus::Flush,
            4 => DownloadStatus::FileVerify,
            5 => DownloadStatus::Complete,
            6 => DownloadStatus::Failed,
            7 => DownloadStatus::Stop,
            _ => DownloadStatus::None,
        }
    }
}
