use std::fmt;
use std::sync::Arc;

use crate::buffer::BufferProducer;
use crate::metadata::CameraMetadata;
use crate::pixel_format::PixelFormat;

#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

/// 流的用途，决定驱动侧的 pipeline 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub enum StreamIntent {
    Preview,
    Video,
    StillCapture,
    /// 元数据 (人脸等分析结果)
    Analyze,
}

/// 面向驱动的流描述符 (createStreams 的入参)
#[derive(Clone)]
pub struct StreamInfo {
    pub stream_id: i32,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub intent: StreamIntent,
    /// 缓冲区由驱动直接写入 Surface
    pub tunneled_mode: bool,
    /// 为空表示延迟绑定的预览流尚未拿到 Surface
    pub producer: Option<Arc<dyn BufferProducer>>,
    /// 需要编码时的目标格式
    pub encode_type: Option<PixelFormat>,
}

impl fmt::Debug for StreamInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamInfo")
            .field("stream_id", &self.stream_id)
            .field("size", &(self.width, self.height))
            .field("format", &self.format)
            .field("intent", &self.intent)
            .field("producer", &self.producer.as_ref().map(|p| p.id()))
            .finish()
    }
}

/// 下发 capture 时附带的参数
#[derive(Debug, Clone)]
pub struct CaptureInfo {
    pub stream_ids: Vec<i32>,
    pub settings: Arc<CameraMetadata>,
    pub enable_shutter_callback: bool,
}

/// commitStreams 的工作模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationMode {
    Normal,
}

/// 结果回调上报方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCallbackMode {
    PerFrame,
    OnChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureEndedInfo {
    pub stream_id: i32,
    pub frame_count: i32,
}

/// 单帧/单次拍照的错误类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamErrorKind {
    /// 驱动内部错误
    Failed,
    /// 丢帧
    BufferLost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureErrorInfo {
    pub stream_id: i32,
    pub error: StreamErrorKind,
}
