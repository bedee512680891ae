use crate::download_segment::SegmentSnapshot;

#[derive(Clone, Debug, Default)]
pub struct DownloadProgress {
    pub downloaded_length: u64,
    pub file_length: u64,
    pub segments: Vec<SegmentSnapshot>,
}

impl DownloadProgress {
    pub fn progress(&self) -> f64 {
        if self.file_length == 0 {
            return 0f64;
        }
        (self.downloaded_length as f64 / self.file_length as f64).clamp(0f64, 1f64)
    }
}
