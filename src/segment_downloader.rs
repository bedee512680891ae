use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use crate::breakpoint_resumption::BreakpointResumptionManager;
use crate::buffer_pool::BufferPool;
use crate::download_configuration::DownloadConfiguration;
use crate::download_progress::DownloadProgress;
use crate::download_segment::{DownloadSegment, LoadingState};
use crate::download_sender::DownloadSender;
use crate::download_status::DownloadStatus;
use crate::error::DownloadError;
use crate::file_verify::{self, FileVerify};
use crate::file_writer::RandomFileWriter;
use crate::segment_manager::SegmentManager;
use crate::transport::{ByteRange, Transport, TransportResponse};

pub const RESPLIT_THRESHOLD: u64 = 1024 * 1024;
pub const PROBE_LENGTH: u64 = 100;
pub const MAX_FAILURE_STREAK: usize = 10;

const MIB: u64 = 1024 * 1024;

struct WorkItem {
    segment: Arc<DownloadSegment>,
    response: Option<OpenResponse>,
}

struct OpenResponse {
    start: u64,
    response: TransportResponse,
}

enum SegmentOutcome {
    Finished,
    Paused,
    Cancelled,
}

struct DownloadContext {
    config: Arc<DownloadConfiguration>,
    transport: Arc<dyn Transport>,
    segment_manager: Arc<SegmentManager>,
    file_writer: Arc<RandomFileWriter>,
    buffer_pool: Arc<BufferPool>,
    work_queue: Mutex<VecDeque<WorkItem>>,
    sender: Arc<DownloadSender>,
    segmented: bool,
    failure_streak: AtomicUsize,
}

impl DownloadContext {
    fn report_progress(&self) {
        self.sender.send_progress(DownloadProgress {
            downloaded_length: self.segment_manager.get_downloaded_length(),
            file_length: self.segment_manager.file_length(),
            segments: self.segment_manager.snapshot(),
        });
    }

    fn requeue(&self, segment: Arc<DownloadSegment>) {
        if segment.is_finished() {
            return;
        }
        self.work_queue.lock().push_back(WorkItem {
            segment,
            response: None,
        });
    }

    fn next_work(&self, allow_split: bool) -> Option<WorkItem> {
        loop {
            let item = self.work_queue.lock().pop_front();
            match item {
                Some(item) if item.segment.is_finished() => continue,
                Some(item) => return Some(item),
                None => break,
            }
        }
        if !self.segmented || !allow_split {
            return None;
        }
        let segment = self.segment_manager.get_new_download_segment()?;
        debug!("worker claimed new segment {} at {}", segment.number(), segment.start_point());
        self.report_progress();
        Some(WorkItem {
            segment,
            response: None,
        })
    }

    fn has_work(&self) -> bool {
        !self.work_queue.lock().is_empty() || !self.segment_manager.is_finished()
    }
}

fn is_fatal(error: &DownloadError) -> bool {
    matches!(error, DownloadError::WriterFailed(_) | DownloadError::WriterClosed)
}

pub(crate) async fn start_download(
    config: Arc<DownloadConfiguration>,
    transport: Arc<dyn Transport>,
    sender: Arc<DownloadSender>,
    cancel_token: CancellationToken,
) -> crate::error::Result<()> {
    let result = download(config, transport, sender.clone(), cancel_token).await;
    match &result {
        Ok(()) => sender.send_status(DownloadStatus::Complete),
        Err(DownloadError::Cancelled) => sender.send_status(DownloadStatus::Stop),
        Err(e) => {
            warn!("download failed: {}", e);
            sender.send_status(DownloadStatus::Failed);
        }
    }
    result
}

async fn download(
    config: Arc<DownloadConfiguration>,
    transport: Arc<dyn Transport>,
    sender: Arc<DownloadSender>,
    cancel_token: CancellationToken,
) -> crate::error::Result<()> {
    sender.send_status(DownloadStatus::Probe);

    let first_response = transport.issue_ranged_get(&config.url, None).await?;
    let file_length = match first_response.content_length {
        Some(length) if length > 0 => length,
        other => return Err(DownloadError::InvalidContentLength(other)),
    };
    let segmented = probe_range_support(transport.as_ref(), &config.url, file_length).await;
    info!("{} is {} bytes, range download supported: {}", config.url, file_length, segmented);

    if cancel_token.is_cancelled() {
        return Err(DownloadError::Cancelled);
    }

    let file = open_download_file(&config, file_length)?;
    let buffer_pool = BufferPool::new(config.buffer_length);
    let file_writer = Arc::new(RandomFileWriter::new(file, config.write_order, Some(buffer_pool.clone())));
    let resumption = BreakpointResumptionManager::new(&config.record_file_path, &file_writer, buffer_pool.clone(), file_length);

    let segment_manager = {
        let resumption = resumption.clone();
        let path = config.path.clone();
        tokio::task::spawn_blocking(move || {
            if !segmented {
                return resumption.create_fresh_segment_manager();
            }
            let mut download_file = File::open(&path)?;
            resumption.create_segment_manager(&mut download_file)
        })
        .await?
    };
    let segment_manager = match segment_manager {
        Ok(segment_manager) => segment_manager,
        Err(e) => {
            let _ = file_writer.dispose().await;
            return Err(e);
        }
    };

    let context = Arc::new(DownloadContext {
        config: config.clone(),
        transport,
        segment_manager: Arc::new(segment_manager),
        file_writer: file_writer.clone(),
        buffer_pool,
        work_queue: Mutex::new(VecDeque::new()),
        sender: sender.clone(),
        segmented,
        failure_streak: AtomicUsize::new(0),
    });
    queue_pending_segments(&context, Some(first_response));

    sender.send_status(DownloadStatus::Download);
    context.report_progress();

    let worker_token = cancel_token.child_token();
    let result = drive(&context, &worker_token, &cancel_token).await;
    worker_token.cancel();

    sender.send_status(DownloadStatus::Flush);
    let dispose_result = file_writer.dispose().await;
    context.report_progress();
    result?;
    dispose_result?;

    let file_verify = FileVerify::from(config.remote_file_hash);
    if file_verify != FileVerify::None {
        sender.send_status(DownloadStatus::FileVerify);
        if let Err(e) = file_verify::file_validate(&file_verify, &config.path).await {
            let _ = resumption.remove_record_file();
            return Err(e);
        }
    }

    if !config.keep_record_file {
        resumption.remove_record_file()?;
    }
    info!("{} downloaded to {}", config.url, config.path.display());
    Ok(())
}

async fn probe_range_support(transport: &dyn Transport, url: &str, file_length: u64) -> bool {
    let probe_length = PROBE_LENGTH.min(file_length);
    let range = ByteRange::new(file_length - probe_length, file_length - 1);
    match transport.issue_ranged_get(url, Some(range)).await {
        Ok(response) => response.status == 206 && response.content_length == Some(probe_length),
        Err(e) => {
            debug!("range probe failed: {}", e);
            false
        }
    }
}

fn open_download_file(config: &DownloadConfiguration, file_length: u64) -> crate::error::Result<File> {
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(&config.path)
        .map_err(|source| DownloadError::FileOpen {
            path: config.path.display().to_string(),
            source,
        })?;
    if file.metadata()?.len() != file_length {
        file.set_len(file_length)?;
    }
    Ok(file)
}

fn queue_pending_segments(context: &DownloadContext, first_response: Option<TransportResponse>) {
    let mut first_response = first_response;
    let mut queue = context.work_queue.lock();
    queue.clear();
    for segment in context.segment_manager.get_pending_segments() {
        let response = match segment.start_point() == 0 && segment.downloaded_length() == 0 {
            true => first_response.take().map(|response| OpenResponse { start: 0, response }),
            false => None,
        };
        queue.push_back(WorkItem { segment, response });
    }
}

fn initial_worker_count(segmented: bool, file_length: u64, max_thread_count: usize) -> usize {
    if !segmented {
        return 1;
    }
    let size_mib = (file_length / MIB) as usize;
    size_mib.max(2).min(max_thread_count)
}

async fn drive(
    context: &Arc<DownloadContext>,
    worker_token: &CancellationToken,
    cancel_token: &CancellationToken,
) -> crate::error::Result<()> {
    let mut workers: JoinSet<crate::error::Result<()>> = JoinSet::new();
    let worker_count = initial_worker_count(
        context.segmented,
        context.segment_manager.file_length(),
        context.config.max_thread_count,
    );
    for _ in 0..worker_count {
        spawn_worker(&mut workers, context, worker_token);
    }

    let period = context.config.control_switch_interval.max(Duration::from_millis(1));
    let mut control_switch = interval_at(Instant::now() + period, period);
    control_switch.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if context.segment_manager.is_finished() {
            break;
        }
        tokio::select! {
            _ = cancel_token.cancelled() => {
                worker_token.cancel();
                while workers.join_next().await.is_some() {}
                return Err(DownloadError::Cancelled);
            }
            _ = control_switch.tick(), if context.segmented => {
                control_switch_step(context, &mut workers, worker_token);
            }
            joined = workers.join_next() => match joined {
                Some(Ok(Ok(()))) => {}
                Some(Ok(Err(e))) => {
                    worker_token.cancel();
                    while workers.join_next().await.is_some() {}
                    return Err(e);
                }
                Some(Err(e)) => {
                    worker_token.cancel();
                    while workers.join_next().await.is_some() {}
                    return Err(DownloadError::Join(e));
                }
                None => {
                    if context.segment_manager.is_finished() {
                        break;
                    }
                    // every worker is gone, so every unfinished segment is unowned
                    queue_pending_segments(context, None);
                    if context.work_queue.lock().is_empty() {
                        return Err(DownloadError::Transport("no segment left to download".to_string()));
                    }
                    spawn_worker(&mut workers, context, worker_token);
                }
            }
        }
    }

    worker_token.cancel();
    while let Some(joined) = workers.join_next().await {
        if let Ok(Err(e)) = joined {
            if is_fatal(&e) {
                return Err(e);
            }
        }
    }
    Ok(())
}

fn control_switch_step(
    context: &Arc<DownloadContext>,
    workers: &mut JoinSet<crate::error::Result<()>>,
    worker_token: &CancellationToken,
) {
    let status = context.segment_manager.get_download_segment_status();
    if let Some(slowest) = &status.slowest_running_segment {
        if status.max_idle_duration > context.config.segment_pause_idle && status.running_count > 1 {
            if slowest.try_pause() {
                info!("pause segment {} idle for {:?}", slowest.number(), status.max_idle_duration);
            }
            return;
        }
    }

    let healthy = status.slowest_running_segment.is_some() && status.max_idle_duration < context.config.segment_healthy_idle;
    let wanted = (healthy && context.has_work()) || status.running_count < 1;
    if wanted && workers.len() < context.config.max_thread_count {
        debug!("start worker, {} segments running", status.running_count);
        spawn_worker(workers, context, worker_token);
    }
}

fn spawn_worker(
    workers: &mut JoinSet<crate::error::Result<()>>,
    context: &Arc<DownloadContext>,
    worker_token: &CancellationToken,
) {
    let context = context.clone();
    let token = worker_token.clone();
    workers.spawn(run_worker(context, token));
}

async fn run_worker(context: Arc<DownloadContext>, cancel: CancellationToken) -> crate::error::Result<()> {
    let mut allow_split = true;
    while let Some(item) = context.next_work(allow_split) {
        let segment = item.segment.clone();
        segment.set_loading_state(LoadingState::Running);
        context.report_progress();

        match download_segment(&context, item, &cancel).await {
            Ok(SegmentOutcome::Finished) => {
                let span = segment.requirement_download_point() - segment.start_point();
                allow_split = span > RESPLIT_THRESHOLD;
                debug!("segment {} finished, span {}", segment.number(), span);
            }
            Ok(SegmentOutcome::Paused) => {
                context.requeue(segment);
                return Ok(());
            }
            Ok(SegmentOutcome::Cancelled) => {
                segment.set_loading_state(LoadingState::Stopped);
                return Ok(());
            }
            Err(e) if is_fatal(&e) => {
                segment.set_loading_state(LoadingState::Stopped);
                return Err(e);
            }
            Err(e) => {
                segment.set_loading_state(LoadingState::Pause);
                let streak = context.failure_streak.fetch_add(1, Ordering::AcqRel) + 1;
                warn!("segment {} failed at {}: {}, attempt {}", segment.number(), segment.current_download_point(), e, streak);
                if streak >= MAX_FAILURE_STREAK {
                    return Err(e);
                }
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(context.config.retry_delay) => {}
                }
                context.requeue(segment);
            }
        }
        context.report_progress();
    }
    Ok(())
}

async fn open_segment_response(context: &DownloadContext, segment: &DownloadSegment) -> crate::error::Result<OpenResponse> {
    let from = segment.current_download_point();
    let range = match context.segmented {
        true => Some(ByteRange::new(from, segment.requirement_download_point() - 1)),
        false => None,
    };
    let request = context.transport.issue_ranged_get(&context.config.url, range);
    let response = match timeout(context.config.step_timeout, request).await {
        Ok(response) => response?,
        Err(_) => return Err(DownloadError::ReadTimeout(context.config.step_timeout)),
    };
    // a 200 answer to a range request carries the whole body
    let start = match range.is_some() && response.status == 206 {
        true => from,
        false => 0,
    };
    Ok(OpenResponse { start, response })
}

async fn download_segment(context: &DownloadContext, item: WorkItem, cancel: &CancellationToken) -> crate::error::Result<SegmentOutcome> {
    let segment = item.segment;
    if segment.is_finished() {
        return Ok(SegmentOutcome::Finished);
    }

    let open = match item.response {
        Some(open) => open,
        None => open_segment_response(context, &segment).await?,
    };
    let mut position = open.start;
    let mut stream = open.response.stream;
    let step_timeout = context.config.step_timeout;
    let buffer_length = context.buffer_pool.buffer_length();

    loop {
        if segment.loading_state() == LoadingState::Pause {
            return Ok(SegmentOutcome::Paused);
        }

        let next = tokio::select! {
            _ = cancel.cancelled() => return Ok(SegmentOutcome::Cancelled),
            _ = segment.paused() => continue,
            next = timeout(step_timeout, stream.next()) => next,
        };
        let bytes = match next {
            Err(_) => return Err(DownloadError::ReadTimeout(step_timeout)),
            Ok(None) => {
                if segment.is_finished() {
                    return Ok(SegmentOutcome::Finished);
                }
                return Err(DownloadError::Transport(format!(
                    "stream ended at {} before {}",
                    position,
                    segment.requirement_download_point()
                )));
            }
            Ok(Some(chunk)) => chunk?,
        };

        let mut data = &bytes[..];
        let current = segment.current_download_point();
        if position < current {
            let skip = (current - position).min(data.len() as u64) as usize;
            data = &data[skip..];
            position += skip as u64;
        }
        if position > current && !data.is_empty() {
            return Err(DownloadError::Transport(format!("response at {} skipped past {}", position, current)));
        }

        while !data.is_empty() {
            let take = data.len().min(buffer_length);
            let (offset, allowed) = segment.claim(take as u64);
            if allowed == 0 {
                return Ok(SegmentOutcome::Finished);
            }
            let allowed = allowed as usize;
            let mut buffer = context.buffer_pool.rent();
            buffer[..allowed].copy_from_slice(&data[..allowed]);
            context.file_writer.queue_write(offset, buffer, 0, allowed)?;
            context.failure_streak.store(0, Ordering::Release);

            data = &data[allowed..];
            position += allowed as u64;
            context.report_progress();
            if segment.is_finished() {
                return Ok(SegmentOutcome::Finished);
            }
        }
    }
}
