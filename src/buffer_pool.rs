use std::sync::Arc;
use parking_lot::Mutex;

pub struct BufferPool {
    buffer_length: usize,
    buffers: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    pub fn new(buffer_length: usize) -> Arc<Self> {
        Arc::new(Self {
            buffer_length,
            buffers: Mutex::new(Vec::new()),
        })
    }

    pub fn buffer_length(&self) -> usize {
        self.buffer_length
    }

    pub fn rent(&self) -> Vec<u8> {
        if let Some(buffer) = self.buffers.lock().pop() {
            return buffer;
        }
        vec![0u8; self.buffer_length]
    }

    pub fn return_buffer(&self, mut buffer: Vec<u8>) {
        if buffer.capacity() < self.buffer_length {
            return;
        }
        buffer.resize(self.buffer_length, 0);
        self.buffers.lock().push(buffer);
    }

    pub fn available(&self) -> usize {
        self.buffers.lock().len()
    }
}
