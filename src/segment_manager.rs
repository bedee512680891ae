use std::sync::Arc;
use std::time::{Duration, Instant};
use parking_lot::Mutex;
use tracing::debug;
use crate::download_segment::{DownloadSegment, LoadingState, SegmentSnapshot};

struct SegmentList {
    segments: Vec<Arc<DownloadSegment>>,
    next_number: usize,
}

pub struct SegmentStatus {
    pub slowest_running_segment: Option<Arc<DownloadSegment>>,
    pub running_count: usize,
    pub max_idle_duration: Duration,
}

pub struct SegmentManager {
    file_length: u64,
    list: Mutex<SegmentList>,
}

impl SegmentManager {
    pub fn new(file_length: u64) -> SegmentManager {
        SegmentManager {
            file_length,
            list: Mutex::new(SegmentList {
                segments: Vec::new(),
                next_number: 0,
            }),
        }
    }

    pub fn file_length(&self) -> u64 {
        self.file_length
    }

    /// Bisects the largest remaining gap. The first call covers the whole file.
    pub fn get_new_download_segment(&self) -> Option<Arc<DownloadSegment>> {
        let mut list = self.list.lock();
        if list.segments.is_empty() {
            let segment = Arc::new(DownloadSegment::new(0, self.file_length));
            Self::register(&mut list, segment.clone());
            return Some(segment);
        }

        let mut largest: Option<(usize, u64, u64)> = None;
        for (index, segment) in list.segments.iter().enumerate() {
            let boundary = match list.segments.get(index + 1) {
                Some(next) => next.start_point(),
                None => self.file_length,
            };
            let gap = segment.gap_to(boundary);
            if gap > largest.map_or(0, |(_, length, _)| length) {
                largest = Some((index, gap, boundary));
            }
        }

        let (index, gap, boundary) = largest?;
        let owner = list.segments[index].clone();
        let segment = Arc::new(owner.split_tail(boundary)?);
        debug!(
            "split segment {} gap {} at {}, new segment [{}, {})",
            owner.number(),
            gap,
            segment.start_point(),
            segment.start_point(),
            boundary
        );
        Self::register(&mut list, segment.clone());
        Some(segment)
    }

    pub fn register_download_segment(&self, segment: Arc<DownloadSegment>) {
        let mut list = self.list.lock();
        Self::register(&mut list, segment);
    }

    fn register(list: &mut SegmentList, segment: Arc<DownloadSegment>) {
        segment.set_number(list.next_number);
        list.next_number += 1;
        let position = list
            .segments
            .iter()
            .position(|s| s.start_point() > segment.start_point())
            .unwrap_or(list.segments.len());
        list.segments.insert(position, segment);
    }

    pub fn is_finished(&self) -> bool {
        self.list.lock().segments.iter().all(|s| s.is_finished())
    }

    pub fn get_downloaded_length(&self) -> u64 {
        self.list.lock().segments.iter().map(|s| s.downloaded_length()).sum()
    }

    pub fn get_download_segment_list(&self) -> Vec<Arc<DownloadSegment>> {
        self.list.lock().segments.clone()
    }

    pub fn snapshot(&self) -> Vec<SegmentSnapshot> {
        self.list.lock().segments.iter().map(|s| s.snapshot()).collect()
    }

    pub fn get_pending_segments(&self) -> Vec<Arc<DownloadSegment>> {
        self.list
            .lock()
            .segments
            .iter()
            .filter(|s| !s.is_finished() && s.loading_state() != LoadingState::Running)
            .cloned()
            .collect()
    }

    pub fn get_download_segment_status(&self) -> SegmentStatus {
        let now = Instant::now();
        let list = self.list.lock();
        let mut status = SegmentStatus {
            slowest_running_segment: None,
            running_count: 0,
            max_idle_duration: Duration::ZERO,
        };
        for segment in list.segments.iter() {
            if segment.loading_state() != LoadingState::Running {
                continue;
            }
            status.running_count += 1;
            let idle = segment.idle_duration(now);
            if status.slowest_running_segment.is_none() || idle > status.max_idle_duration {
                status.max_idle_duration = idle;
                status.slowest_running_segment = Some(segment.clone());
            }
        }
        status
    }
}
