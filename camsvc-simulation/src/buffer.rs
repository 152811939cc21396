use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use camsvc_core::buffer::BufferProducer;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// 只记录尺寸的 Surface 生产端
#[derive(Debug)]
pub struct SimBufferProducer {
    id: u64,
    size: (u32, u32),
}

impl SimBufferProducer {
    pub fn new(width: u32, height: u32) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            size: (width, height),
        })
    }
}

impl BufferProducer for SimBufferProducer {
    fn id(&self) -> u64 {
        self.id
    }

    fn default_size(&self) -> (u32, u32) {
        self.size
    }
}
