use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use parking_lot::{Condvar, Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error};
use crate::buffer_pool::BufferPool;
use crate::error::DownloadError;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum WriteOrder {
    Sequential,
    #[default]
    OrderFirst,
}

pub struct StepWrite<'a> {
    pub offset: u64,
    pub buffer: &'a [u8],
    pub buffer_offset: usize,
    pub length: usize,
}

impl StepWrite<'_> {
    pub fn data(&self) -> &[u8] {
        &self.buffer[self.buffer_offset..self.buffer_offset + self.length]
    }
}

/// Called on the drain thread in physical-write order. An error is fatal to the writer.
pub trait StepWriteListener: Send + Sync {
    fn on_step_write(&self, step: &StepWrite<'_>) -> crate::error::Result<()>;
}

struct WriteRequest {
    offset: u64,
    buffer: Vec<u8>,
    buffer_offset: usize,
    length: usize,
}

struct WriteQueue {
    pending: Vec<WriteRequest>,
    closed: bool,
}

struct Shared {
    queue: Mutex<WriteQueue>,
    available: Condvar,
    listeners: RwLock<Vec<Arc<dyn StepWriteListener>>>,
    buffer_pool: Option<Arc<BufferPool>>,
    failure: Mutex<Option<String>>,
    queued: AtomicU64,
    written: watch::Sender<u64>,
}

impl Shared {
    fn failure(&self) -> Option<DownloadError> {
        self.failure.lock().as_ref().map(|message| DownloadError::WriterFailed(message.clone()))
    }

    fn recycle(&self, buffer: Vec<u8>) {
        if let Some(pool) = &self.buffer_pool {
            pool.return_buffer(buffer);
        }
    }
}

pub struct RandomFileWriter {
    shared: Arc<Shared>,
    written: watch::Receiver<u64>,
    drain_handle: Mutex<Option<JoinHandle<crate::error::Result<()>>>>,
}

impl RandomFileWriter {
    /// Must be called inside a tokio runtime.
    pub fn new(file: File, order: WriteOrder, buffer_pool: Option<Arc<BufferPool>>) -> RandomFileWriter {
        let (written_sender, written) = watch::channel(0u64);
        let shared = Arc::new(Shared {
            queue: Mutex::new(WriteQueue {
                pending: Vec::new(),
                closed: false,
            }),
            available: Condvar::new(),
            listeners: RwLock::new(Vec::new()),
            buffer_pool,
            failure: Mutex::new(None),
            queued: AtomicU64::new(0),
            written: written_sender,
        });

        let drain_shared = shared.clone();
        let handle = tokio::task::spawn_blocking(move || drain(drain_shared, file, order));

        RandomFileWriter {
            shared,
            written,
            drain_handle: Mutex::new(Some(handle)),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn StepWriteListener>) {
        self.shared.listeners.write().push(listener);
    }

    /// Never blocks. The writer returns `buffer` to the pool once written.
    pub fn queue_write(&self, offset: u64, buffer: Vec<u8>, buffer_offset: usize, length: usize) -> crate::error::Result<()> {
        if let Some(e) = self.shared.failure() {
            self.shared.recycle(buffer);
            return Err(e);
        }
        if buffer_offset + length > buffer.len() {
            self.shared.recycle(buffer);
            return Err(DownloadError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "write range exceeds buffer",
            )));
        }

        let mut queue = self.shared.queue.lock();
        if queue.closed {
            drop(queue);
            self.shared.recycle(buffer);
            return Err(DownloadError::WriterClosed);
        }
        queue.pending.push(WriteRequest {
            offset,
            buffer,
            buffer_offset,
            length,
        });
        self.shared.queued.fetch_add(1, Ordering::AcqRel);
        drop(queue);
        self.shared.available.notify_one();
        Ok(())
    }

    pub fn written_count(&self) -> u64 {
        *self.written.borrow()
    }

    pub async fn flush(&self) -> crate::error::Result<()> {
        let target = self.shared.queued.load(Ordering::Acquire);
        let mut written = self.written.clone();
        loop {
            if let Some(e) = self.shared.failure() {
                return Err(e);
            }
            if *written.borrow_and_update() >= target {
                return Ok(());
            }
            if written.changed().await.is_err() {
                return Err(DownloadError::WriterClosed);
            }
        }
    }

    pub async fn dispose(&self) -> crate::error::Result<()> {
        self.close();
        let handle = self.drain_handle.lock().take();
        if let Some(handle) = handle {
            handle.await??;
        }
        match self.shared.failure() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn close(&self) {
        self.shared.queue.lock().closed = true;
        self.shared.available.notify_all();
    }
}

impl Drop for RandomFileWriter {
    fn drop(&mut self) {
        self.close();
    }
}

fn next_write_index(pending: &[WriteRequest], position: u64) -> usize {
    pending.iter().position(|request| request.offset == position).unwrap_or(0)
}

fn drain(shared: Arc<Shared>, mut file: File, order: WriteOrder) -> crate::error::Result<()> {
    let mut position = 0u64;
    let mut batch: Vec<WriteRequest> = Vec::new();
    loop {
        {
            let mut queue = shared.queue.lock();
            while queue.pending.is_empty() && !queue.closed {
                shared.available.wait(&mut queue);
            }
            if queue.pending.is_empty() {
                break;
            }
            mem::swap(&mut queue.pending, &mut batch);
        }
        debug!("writer drained batch of {} writes", batch.len());

        while !batch.is_empty() {
            let index = match order {
                WriteOrder::Sequential => 0,
                WriteOrder::OrderFirst => next_write_index(&batch, position),
            };
            let request = batch.remove(index);
            if let Err(e) = write_request(&shared, &mut file, &mut position, &request) {
                error!("file writer failed at offset {}: {}", request.offset, e);
                *shared.failure.lock() = Some(e.to_string());
                shared.recycle(request.buffer);
                for request in batch.drain(..) {
                    shared.recycle(request.buffer);
                }
                let mut queue = shared.queue.lock();
                queue.closed = true;
                for request in queue.pending.drain(..) {
                    shared.recycle(request.buffer);
                }
                drop(queue);
                shared.written.send_modify(|_| {});
                return Err(e);
            }
            shared.recycle(request.buffer);
            shared.written.send_modify(|count| *count += 1);
        }
    }

    file.flush()?;
    Ok(())
}

fn write_request(shared: &Shared, file: &mut File, position: &mut u64, request: &WriteRequest) -> crate::error::Result<()> {
    let data = &request.buffer[request.buffer_offset..request.buffer_offset + request.length];
    if *position != request.offset {
        file.seek(SeekFrom::Start(request.offset))?;
    }
    file.write_all(data)?;
    *position = request.offset + request.length as u64;

    let step = StepWrite {
        offset: request.offset,
        buffer: &request.buffer,
        buffer_offset: request.buffer_offset,
        length: request.length,
    };
    for listener in shared.listeners.read().iter() {
        listener.on_step_write(&step)?;
    }
    Ok(())
}
