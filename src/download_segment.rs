use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LoadingState {
    Pause,
    Running,
    Finished,
    Stopped,
}

struct SegmentProgress {
    requirement_download_point: u64,
    downloaded_length: u64,
    loading_state: LoadingState,
    last_down_time: Instant,
}

/// `requirement_download_point` shrinks when the manager splits this segment's tail;
/// the split and `claim` share one lock.
pub struct DownloadSegment {
    start_point: u64,
    number: AtomicUsize,
    progress: Mutex<SegmentProgress>,
    pause_notify: Notify,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SegmentSnapshot {
    pub number: usize,
    pub start_point: u64,
    pub requirement_download_point: u64,
    pub downloaded_length: u64,
    pub loading_state: LoadingState,
}

impl SegmentSnapshot {
    pub fn current_download_point(&self) -> u64 {
        self.start_point + self.downloaded_length
    }
}

impl DownloadSegment {
    pub fn new(start_point: u64, requirement_download_point: u64) -> DownloadSegment {
        Self::with_progress(start_point, requirement_download_point, 0, LoadingState::Pause)
    }

    pub fn finished(start_point: u64, length: u64) -> DownloadSegment {
        Self::with_progress(start_point, start_point + length, length, LoadingState::Finished)
    }

    fn with_progress(start_point: u64, requirement_download_point: u64, downloaded_length: u64, loading_state: LoadingState) -> DownloadSegment {
        DownloadSegment {
            start_point,
            number: AtomicUsize::new(0),
            progress: Mutex::new(SegmentProgress {
                requirement_download_point,
                downloaded_length,
                loading_state,
                last_down_time: Instant::now(),
            }),
            pause_notify: Notify::new(),
        }
    }

    pub fn start_point(&self) -> u64 {
        self.start_point
    }

    pub fn number(&self) -> usize {
        self.number.load(Ordering::Relaxed)
    }

    pub(crate) fn set_number(&self, number: usize) {
        self.number.store(number, Ordering::Relaxed);
    }

    pub fn requirement_download_point(&self) -> u64 {
        self.progress.lock().requirement_download_point
    }

    pub fn downloaded_length(&self) -> u64 {
        self.progress.lock().downloaded_length
    }

    pub fn current_download_point(&self) -> u64 {
        self.start_point + self.downloaded_length()
    }

    pub fn is_finished(&self) -> bool {
        let progress = self.progress.lock();
        self.start_point + progress.downloaded_length >= progress.requirement_download_point
    }

    pub fn loading_state(&self) -> LoadingState {
        self.progress.lock().loading_state
    }

    pub fn set_loading_state(&self, state: LoadingState) {
        let mut progress = self.progress.lock();
        if self.start_point + progress.downloaded_length >= progress.requirement_download_point {
            progress.loading_state = LoadingState::Finished;
            return;
        }
        if state == LoadingState::Running {
            progress.last_down_time = Instant::now();
        }
        progress.loading_state = state;
    }

    pub fn try_pause(&self) -> bool {
        let mut progress = self.progress.lock();
        if progress.loading_state != LoadingState::Running {
            return false;
        }
        progress.loading_state = LoadingState::Pause;
        drop(progress);
        self.pause_notify.notify_one();
        true
    }

    /// May resolve for a stale pause; re-check `loading_state`.
    pub async fn paused(&self) {
        self.pause_notify.notified().await
    }

    pub fn idle_duration(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.progress.lock().last_down_time)
    }

    /// Returns `(offset, allowed)`; `allowed` is zero once the segment is finished.
    pub fn claim(&self, length: u64) -> (u64, u64) {
        let mut progress = self.progress.lock();
        let offset = self.start_point + progress.downloaded_length;
        let allowed = length.min(progress.requirement_download_point.saturating_sub(offset));
        progress.downloaded_length += allowed;
        progress.last_down_time = Instant::now();
        if offset + allowed >= progress.requirement_download_point {
            progress.loading_state = LoadingState::Finished;
        }
        (offset, allowed)
    }

    pub(crate) fn gap_to(&self, boundary: u64) -> u64 {
        let progress = self.progress.lock();
        boundary.saturating_sub(self.start_point + progress.downloaded_length)
    }

    /// `None` when fewer than two bytes remain.
    pub(crate) fn split_tail(&self, boundary: u64) -> Option<DownloadSegment> {
        let mut progress = self.progress.lock();
        let current = self.start_point + progress.downloaded_length;
        let length = boundary.saturating_sub(current);
        let half = length / 2;
        if half == 0 {
            return None;
        }
        let split_point = current + half;
        progress.requirement_download_point = split_point;
        Some(DownloadSegment::new(split_point, boundary))
    }

    pub fn snapshot(&self) -> SegmentSnapshot {
        let progress = self.progress.lock();
        SegmentSnapshot {
            number: self.number(),
            start_point: self.start_point,
            requirement_download_point: progress.requirement_download_point,
            downloaded_length: progress.downloaded_length,
            loading_state: progress.loading_state,
        }
    }
}

impl std::fmt::Debug for DownloadSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("DownloadSegment")
            .field("number", &snapshot.number)
            .field("start_point", &snapshot.start_point)
            .field("requirement_download_point", &snapshot.requirement_download_point)
            .field("downloaded_length", &snapshot.downloaded_length)
            .field("loading_state", &snapshot.loading_state)
            .finish()
    }
}
