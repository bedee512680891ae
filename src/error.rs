use thiserror::Error;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("download url is empty")]
    EmptyUrl,
    #[error("download file path is empty")]
    EmptyFilePath,
    #[error("invalid content length {0:?}")]
    InvalidContentLength(Option<u64>),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected http status {0}")]
    HttpStatus(u16),
    #[error("read timed out after {0:?}")]
    ReadTimeout(std::time::Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("open file {path} failed: {source}")]
    FileOpen {
        path: String,
        source: std::io::Error,
    },
    #[error("record file error: {0}")]
    RecordFile(std::io::Error),
    #[error("file writer is closed")]
    WriterClosed,
    #[error("file writer failed: {0}")]
    WriterFailed(String),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("downloaded file hash mismatch, expected {expected:x} got {actual:x}")]
    FileVerify {
        expected: u64,
        actual: u64,
    },
    #[error("download cancelled")]
    Cancelled,
    #[error("download outcome already taken")]
    AlreadyJoined,
}

pub type Result<T> = core::result::Result<T, DownloadError>;
