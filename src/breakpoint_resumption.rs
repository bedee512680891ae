use std::fs::{File, OpenOptions};
use std::io::{BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use crate::buffer_pool::BufferPool;
use crate::checksum;
use crate::data_range::DataRange;
use crate::download_segment::DownloadSegment;
use crate::error::DownloadError;
use crate::file_writer::{RandomFileWriter, StepWrite, StepWriteListener};
use crate::record_file::{RecordFormatter, RecordLog, DOWNLOADED_INFO_RECORD_LENGTH};
use crate::segment_manager::SegmentManager;

const RECORD_HEADER_LENGTH: u64 = 24;

pub struct BreakpointResumptionManager {
    record_file_path: PathBuf,
    download_length: u64,
    buffer_pool: Arc<BufferPool>,
    record_file: Mutex<Option<File>>,
}

impl BreakpointResumptionManager {
    pub fn new(
        record_file_path: impl Into<PathBuf>,
        file_writer: &RandomFileWriter,
        buffer_pool: Arc<BufferPool>,
        download_length: u64,
    ) -> Arc<BreakpointResumptionManager> {
        let manager = Arc::new(BreakpointResumptionManager {
            record_file_path: record_file_path.into(),
            download_length,
            buffer_pool,
            record_file: Mutex::new(None),
        });
        file_writer.add_listener(manager.clone());
        manager
    }

    /// Verified recorded ranges become finished segments; an unusable log is replaced
    /// with a fresh one.
    pub fn create_segment_manager(&self, download_file: &mut File) -> crate::error::Result<SegmentManager> {
        let mut record_file = open_write_through(&self.record_file_path).map_err(DownloadError::RecordFile)?;

        let log = match RecordFormatter::read(&mut BufReader::new(&record_file)) {
            Ok(log) => log,
            Err(e) => {
                warn!("read record file {} failed: {}", self.record_file_path.display(), e);
                None
            }
        };

        let log = match log {
            Some(log) if log.download_length == self.download_length && !log.ranges.is_empty() => log,
            other => {
                match other {
                    Some(log) if log.download_length != self.download_length => {
                        warn!("record file length {} does not match {}, starting over", log.download_length, self.download_length);
                    }
                    Some(_) => debug!("record file has no ranges, starting over"),
                    None => debug!("no usable record file at {}", self.record_file_path.display()),
                }
                reset_record_file(&mut record_file, self.download_length).map_err(DownloadError::RecordFile)?;
                *self.record_file.lock() = Some(record_file);
                return Ok(self.fresh_segment_manager());
            }
        };

        // drop a partial trailing record so appends stay aligned
        let valid_length = RECORD_HEADER_LENGTH + (log.ranges.len() * DOWNLOADED_INFO_RECORD_LENGTH) as u64;
        record_file.set_len(valid_length).map_err(DownloadError::RecordFile)?;
        record_file.seek(SeekFrom::End(0)).map_err(DownloadError::RecordFile)?;
        *self.record_file.lock() = Some(record_file);

        let verified = self.verify_ranges(&log, download_file);
        info!(
            "record file lists {} ranges covering {} bytes, {} ranges verified",
            log.ranges.len(),
            log.covered_length(),
            verified.len()
        );

        let segment_manager = SegmentManager::new(self.download_length);
        for segment in build_segments(self.download_length, &verified) {
            segment_manager.register_download_segment(Arc::new(segment));
        }
        Ok(segment_manager)
    }

    pub fn create_fresh_segment_manager(&self) -> crate::error::Result<SegmentManager> {
        let mut record_file = open_write_through(&self.record_file_path).map_err(DownloadError::RecordFile)?;
        reset_record_file(&mut record_file, self.download_length).map_err(DownloadError::RecordFile)?;
        *self.record_file.lock() = Some(record_file);
        Ok(self.fresh_segment_manager())
    }

    fn fresh_segment_manager(&self) -> SegmentManager {
        let segment_manager = SegmentManager::new(self.download_length);
        if self.download_length > 0 {
            segment_manager.register_download_segment(Arc::new(DownloadSegment::new(0, self.download_length)));
        }
        segment_manager
    }

    fn verify_ranges(&self, log: &RecordLog, download_file: &mut File) -> Vec<DataRange> {
        let mut ranges = log.ranges.clone();
        ranges.sort();

        let mut buffer = self.buffer_pool.rent();
        let mut verified = Vec::with_capacity(ranges.len());
        for range in ranges {
            let in_bounds = matches!(range.start.checked_add(range.length), Some(end) if end <= self.download_length);
            if range.length == 0 || !in_bounds {
                warn!("record range at {} length {} is out of bounds", range.start, range.length);
                continue;
            }
            match checksum::checksum_span(download_file, range.start, range.length, &mut buffer) {
                Ok(value) if Some(value) == range.checksum => verified.push(range),
                Ok(_) => warn!("record range [{}, {}) checksum mismatch", range.start, range.last_point()),
                Err(e) => warn!("record range [{}, {}) unreadable: {}", range.start, range.last_point(), e),
            }
        }
        self.buffer_pool.return_buffer(buffer);
        verified
    }

    pub fn remove_record_file(&self) -> crate::error::Result<()> {
        drop(self.record_file.lock().take());
        match std::fs::remove_file(&self.record_file_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DownloadError::RecordFile(e)),
        }
    }

    fn append(&self, range: &DataRange) -> crate::error::Result<()> {
        let mut record_file = self.record_file.lock();
        match record_file.as_mut() {
            Some(file) => file
                .write_all(&RecordFormatter::encode_range(range))
                .map_err(DownloadError::RecordFile),
            None => Err(DownloadError::RecordFile(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "record file is not open",
            ))),
        }
    }
}

impl StepWriteListener for BreakpointResumptionManager {
    fn on_step_write(&self, step: &StepWrite<'_>) -> crate::error::Result<()> {
        let range = DataRange::with_checksum(step.offset, step.length as u64, checksum::checksum(step.data()));
        self.append(&range)
    }
}

/// `verified` must be sorted by start. Overlapping ranges are clipped.
fn build_segments(download_length: u64, verified: &[DataRange]) -> Vec<DownloadSegment> {
    let mut segments = Vec::with_capacity(verified.len() * 2 + 1);
    let mut point = 0u64;
    for range in verified {
        if range.start > point {
            segments.push(DownloadSegment::new(point, range.start));
            point = range.start;
        }
        if range.last_point() > point {
            segments.push(DownloadSegment::finished(point, range.last_point() - point));
            point = range.last_point();
        }
    }
    if point < download_length {
        segments.push(DownloadSegment::new(point, download_length));
    }
    segments
}

fn reset_record_file(file: &mut File, download_length: u64) -> std::io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    RecordFormatter::write_header(file, download_length)
}

#[cfg(unix)]
fn open_write_through(path: &Path) -> std::io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .custom_flags(libc::O_DSYNC)
        .open(path)
}

#[cfg(windows)]
fn open_write_through(path: &Path) -> std::io::Result<File> {
    use std::os::windows::fs::OpenOptionsExt;
    const FILE_FLAG_WRITE_THROUGH: u32 = 0x8000_0000;
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .custom_flags(FILE_FLAG_WRITE_THROUGH)
        .open(path)
}

#[cfg(not(any(unix, windows)))]
fn open_write_through(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).read(true).write(true).truncate(false).open(path)
}

#[cfg(test)]
mod test {
    use std::fs::{File, OpenOptions};
    use std::path::Path;
    use crate::breakpoint_resumption::BreakpointResumptionManager;
    use crate::buffer_pool::BufferPool;
    use crate::checksum;
    use crate::data_range::DataRange;
    use crate::download_segment::LoadingState;
    use crate::file_writer::{RandomFileWriter, WriteOrder};
    use crate::record_file::RecordFormatter;
    use crate::segment_manager::SegmentManager;

    fn content(length: usize) -> Vec<u8> {
        (0..length).map(|i| (i * 13 % 256) as u8).collect()
    }

    fn open(path: &Path) -> File {
        OpenOptions::new().create(true).read(true).write(true).open(path).unwrap()
    }

    fn write_record_file(path: &Path, download_length: u64, ranges: &[DataRange]) {
        let mut buffer = Vec::new();
        RecordFormatter::write_header(&mut buffer, download_length).unwrap();
        for range in ranges {
            RecordFormatter::write_range(&mut buffer, range).unwrap();
        }
        std::fs::write(path, buffer).unwrap();
    }

    fn recorded(data: &[u8], spans: &[(u64, u64)]) -> Vec<DataRange> {
        spans
            .iter()
            .map(|&(start, length)| {
                let bytes = &data[start as usize..(start + length) as usize];
                DataRange::with_checksum(start, length, checksum::checksum(bytes))
            })
            .collect()
    }

    async fn rebuild(dir: &Path, data: &[u8], ranges: &[DataRange]) -> SegmentManager {
        let download_path = dir.join("download.bin");
        let record_path = dir.join("download.bin.dlrecord");
        std::fs::write(&download_path, data).unwrap();
        write_record_file(&record_path, data.len() as u64, ranges);

        let writer = RandomFileWriter::new(open(&download_path), WriteOrder::OrderFirst, None);
        let manager = BreakpointResumptionManager::new(&record_path, &writer, BufferPool::new(4), data.len() as u64);
        let segment_manager = manager.create_segment_manager(&mut open(&download_path)).unwrap();
        writer.dispose().await.unwrap();
        segment_manager
    }

    fn spans(segment_manager: &SegmentManager) -> Vec<(u64, u64, bool)> {
        segment_manager
            .get_download_segment_list()
            .iter()
            .map(|s| (s.start_point(), s.requirement_download_point(), s.loading_state() == LoadingState::Finished))
            .collect()
    }

    fn assert_chained(segment_manager: &SegmentManager) {
        let list = segment_manager.get_download_segment_list();
        assert_eq!(list.first().unwrap().start_point(), 0);
        for pair in list.windows(2) {
            assert_eq!(pair[0].requirement_download_point(), pair[1].start_point());
        }
        assert_eq!(list.last().unwrap().requirement_download_point(), segment_manager.file_length());
    }

    #[tokio::test]
    async fn test_rebuild_from_verified_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let data = content(100);
        let ranges = recorded(&data, &[(10, 10), (20, 10), (50, 5)]);
        let segment_manager = rebuild(dir.path(), &data, &ranges).await;

        assert_eq!(
            spans(&segment_manager),
            vec![
                (0, 10, false),
                (10, 20, true),
                (20, 30, true),
                (30, 50, false),
                (50, 55, true),
                (55, 100, false),
            ]
        );
        assert_chained(&segment_manager);
        assert_eq!(segment_manager.get_downloaded_length(), 25);
        assert!(!segment_manager.is_finished());
    }

    #[tokio::test]
    async fn test_corrupted_ranges_are_not_trusted() {
        let dir = tempfile::tempdir().unwrap();
        let data = content(100);
        let ranges = recorded(&data, &[(10, 10), (25, 10), (50, 10), (90, 5)]);
        let mut on_disk = data.clone();
        on_disk[27] ^= 0xFF;
        on_disk[55] ^= 0xFF;
        let segment_manager = rebuild(dir.path(), &on_disk, &ranges).await;

        let finished: Vec<(u64, u64)> = spans(&segment_manager)
            .into_iter()
            .filter(|s| s.2)
            .map(|s| (s.0, s.1))
            .collect();
        assert_eq!(finished, vec![(10, 20), (90, 95)]);
        assert_chained(&segment_manager);
    }

    #[tokio::test]
    async fn test_all_ranges_corrupted() {
        let dir = tempfile::tempdir().unwrap();
        let data = content(100);
        let ranges = recorded(&content(200)[100..], &[(0, 10), (40, 20)]);
        let segment_manager = rebuild(dir.path(), &data, &ranges).await;

        assert!(spans(&segment_manager).iter().all(|s| !s.2));
        assert_eq!(segment_manager.get_downloaded_length(), 0);
        assert_chained(&segment_manager);
    }

    #[tokio::test]
    async fn test_overlapping_ranges_cover_each_byte_once() {
        let dir = tempfile::tempdir().unwrap();
        let data = content(100);
        let ranges = recorded(&data, &[(10, 20), (15, 10), (25, 15), (70, 30)]);
        let segment_manager = rebuild(dir.path(), &data, &ranges).await;

        assert_eq!(
            spans(&segment_manager),
            vec![(0, 10, false), (10, 30, true), (30, 40, true), (40, 70, false), (70, 100, true)]
        );
        assert_chained(&segment_manager);
        assert_eq!(segment_manager.get_downloaded_length(), 60);
    }

    #[tokio::test]
    async fn test_length_mismatch_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let data = content(100);
        let download_path = dir.path().join("download.bin");
        let record_path = dir.path().join("download.bin.dlrecord");
        std::fs::write(&download_path, &data).unwrap();
        write_record_file(&record_path, 80, &recorded(&data, &[(0, 50)]));

        let writer = RandomFileWriter::new(open(&download_path), WriteOrder::OrderFirst, None);
        let manager = BreakpointResumptionManager::new(&record_path, &writer, BufferPool::new(16), 100);
        let segment_manager = manager.create_segment_manager(&mut open(&download_path)).unwrap();
        writer.dispose().await.unwrap();

        assert_eq!(spans(&segment_manager), vec![(0, 100, false)]);
        let log = RecordFormatter::read(&mut File::open(&record_path).unwrap()).unwrap().unwrap();
        assert_eq!(log.download_length, 100);
        assert!(log.ranges.is_empty());
    }

    #[tokio::test]
    async fn test_overflowing_record_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let data = content(100);
        let mut ranges = recorded(&data, &[(0, 10)]);
        ranges.push(DataRange::with_checksum(u64::MAX - 1, 5, 0));
        ranges.push(DataRange::with_checksum(u64::MAX - 1, u64::MAX, 0));
        let segment_manager = rebuild(dir.path(), &data, &ranges).await;

        assert_eq!(spans(&segment_manager), vec![(0, 10, true), (10, 100, false)]);
        assert_chained(&segment_manager);
    }

    #[tokio::test]
    async fn test_writes_are_logged_and_resumed() {
        let dir = tempfile::tempdir().unwrap();
        let data = content(64);
        let download_path = dir.path().join("download.bin");
        let record_path = dir.path().join("download.bin.dlrecord");
        open(&download_path).set_len(64).unwrap();

        {
            let pool = BufferPool::new(16);
            let writer = RandomFileWriter::new(open(&download_path), WriteOrder::OrderFirst, Some(pool.clone()));
            let manager = BreakpointResumptionManager::new(&record_path, &writer, pool.clone(), 64);
            let segment_manager = manager.create_segment_manager(&mut open(&download_path)).unwrap();
            assert_eq!(spans(&segment_manager), vec![(0, 64, false)]);

            for start in [48usize, 0, 16] {
                let mut buffer = pool.rent();
                buffer[..16].copy_from_slice(&data[start..start + 16]);
                writer.queue_write(start as u64, buffer, 0, 16).unwrap();
            }
            writer.dispose().await.unwrap();
        }

        let log = RecordFormatter::read(&mut File::open(&record_path).unwrap()).unwrap().unwrap();
        assert_eq!(log.ranges.len(), 3);

        let pool = BufferPool::new(16);
        let writer = RandomFileWriter::new(open(&download_path), WriteOrder::OrderFirst, Some(pool.clone()));
        let manager = BreakpointResumptionManager::new(&record_path, &writer, pool, 64);
        let segment_manager = manager.create_segment_manager(&mut open(&download_path)).unwrap();
        writer.dispose().await.unwrap();

        assert_eq!(spans(&segment_manager), vec![(0, 16, true), (16, 32, true), (32, 48, false), (48, 64, true)]);
        assert_eq!(segment_manager.get_pending_segments().len(), 1);

        manager.remove_record_file().unwrap();
        assert!(!record_path.exists());
    }

    #[tokio::test]
    async fn test_manager_is_listener_of_writer() {
        let dir = tempfile::tempdir().unwrap();
        let download_path = dir.path().join("download.bin");
        let record_path = dir.path().join("download.bin.dlrecord");
        let writer = RandomFileWriter::new(open(&download_path), WriteOrder::Sequential, None);
        let manager = BreakpointResumptionManager::new(&record_path, &writer, BufferPool::new(8), 8);
        manager.create_segment_manager(&mut open(&download_path)).unwrap();

        writer.queue_write(0, vec![9u8; 8], 0, 8).unwrap();
        writer.flush().await.unwrap();
        let log = RecordFormatter::read(&mut File::open(&record_path).unwrap()).unwrap().unwrap();
        assert_eq!(log.ranges.len(), 1);
        assert_eq!(log.ranges[0].checksum, Some(checksum::checksum(&[9u8; 8])));
        writer.dispose().await.unwrap();
    }
}
