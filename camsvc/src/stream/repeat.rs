use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use camsvc_core::buffer::BufferProducer;
use camsvc_core::descriptor::{CaptureInfo, StreamErrorKind, StreamIntent};
use camsvc_core::error::{CameraError, Result};

use super::OutputStream;
use crate::callbacks::RepeatStreamCallback;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum RepeatKind {
    Preview,
    Video,
}

#[derive(Default)]
struct RepeatState {
    /// 正在进行的流式 capture
    capture_id: Option<i32>,
}

pub(super) struct RepeatStream {
    kind: RepeatKind,
    deferred: bool,
    state: Mutex<RepeatState>,
    callback: Mutex<Option<Arc<dyn RepeatStreamCallback>>>,
}

impl RepeatStream {
    pub(super) fn new(kind: RepeatKind, deferred: bool) -> Self {
        Self {
            kind,
            deferred,
            state: Mutex::new(RepeatState::default()),
            callback: Mutex::new(None),
        }
    }

    pub(super) fn intent(&self) -> StreamIntent {
        match self.kind {
            RepeatKind::Preview => StreamIntent::Preview,
            RepeatKind::Video => StreamIntent::Video,
        }
    }

    fn callback(&self) -> Option<Arc<dyn RepeatStreamCallback>> {
        self.callback.lock().clone()
    }
}

/// 预览/录像流的专有操作
pub struct Repeating<'a> {
    stream: &'a OutputStream,
    repeat: &'a RepeatStream,
}

impl<'a> Repeating<'a> {
    pub(super) fn new(stream: &'a OutputStream, repeat: &'a RepeatStream) -> Self {
        Self { stream, repeat }
    }

    pub fn kind(&self) -> RepeatKind {
        self.repeat.kind
    }

    pub fn is_video(&self) -> bool {
        self.repeat.kind == RepeatKind::Video
    }

    pub fn is_deferred(&self) -> bool {
        self.repeat.deferred
    }

    pub fn is_started(&self) -> bool {
        self.repeat.state.lock().capture_id.is_some()
    }

    pub fn set_callback(&self, callback: Arc<dyn RepeatStreamCallback>) {
        *self.repeat.callback.lock() = Some(callback);
    }

    /// 给延迟预览补上 Surface
    pub fn add_deferred_surface(&self, producer: Arc<dyn BufferProducer>) -> Result<()> {
        if !self.repeat.deferred {
            return Err(CameraError::invalid_arg("stream is not a deferred preview"));
        }
        if self.stream.has_producer() {
            return Err(CameraError::invalid_state("surface already attached"));
        }
        self.stream.set_producer(producer);
        info!(stream_id = ?self.stream.stream_id(), "Deferred surface attached");
        Ok(())
    }

    /// 开始流式出图，已开始时直接返回
    pub fn start(&self) -> Result<()> {
        let ctx = self.stream.linked_context()?;
        if !self.stream.has_producer() {
            return Err(CameraError::invalid_state("repeat stream has no surface"));
        }
        let mut state = self.repeat.state.lock();
        if state.capture_id.is_some() {
            return Ok(());
        }

        let capture_id = self.stream.capture_ids().allocate();
        let info = CaptureInfo {
            stream_ids: vec![ctx.stream_id],
            settings: ctx.ability,
            enable_shutter_callback: false,
        };
        ctx.operator
            .capture(capture_id, &info, true)
            .map_err(|status| {
                warn!(stream_id = ctx.stream_id, capture_id, %status, "Repeat start failed");
                CameraError::from(status)
            })?;
        state.capture_id = Some(capture_id);
        info!(stream_id = ctx.stream_id, capture_id, kind = ?self.repeat.kind, "Repeat stream started");
        Ok(())
    }

    /// 停止流式出图，未开始时直接返回
    pub fn stop(&self) -> Result<()> {
        let mut state = self.repeat.state.lock();
        let Some(capture_id) = state.capture_id.take() else {
            return Ok(());
        };
        let ctx = self.stream.linked_context()?;
        ctx.operator.cancel_capture(capture_id).map_err(|status| {
            warn!(stream_id = ctx.stream_id, capture_id, %status, "Repeat stop failed");
            CameraError::from(status)
        })?;
        info!(stream_id = ctx.stream_id, capture_id, "Repeat stream stopped");
        Ok(())
    }

    /// 旧设备已经关闭，流式 capture 随之失效
    pub(crate) fn reset(&self) {
        self.repeat.state.lock().capture_id = None;
    }

    pub(crate) fn on_started(&self) {
        if let Some(cb) = self.repeat.callback() {
            cb.on_frame_started();
        }
    }

    pub(crate) fn on_ended(&self, frame_count: i32) {
        if let Some(cb) = self.repeat.callback() {
            cb.on_frame_ended(frame_count);
        }
    }

    pub(crate) fn on_error(&self, error: StreamErrorKind) {
        if let Some(cb) = self.repeat.callback() {
            cb.on_frame_error(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::operator;
    use super::super::CaptureIdAllocator;
    use super::*;
    use camsvc_core::metadata::CameraMetadata;
    use camsvc_core::pixel_format::PixelFormat;
    use camsvc_simulation::SimBufferProducer;

    #[test]
    fn start_stop_round_trip() {
        let ids = Arc::new(CaptureIdAllocator::new());
        let stream = OutputStream::new_repeat(
            RepeatKind::Preview,
            Some(SimBufferProducer::new(640, 480)),
            PixelFormat::YCrCb420Sp,
            640,
            480,
            ids,
        );
        let op = operator();
        stream
            .link_input(op.clone(), Arc::new(CameraMetadata::unbounded()), 7)
            .unwrap();

        let repeat = stream.as_repeat().unwrap();
        repeat.start().unwrap();
        repeat.start().unwrap();
        assert!(repeat.is_started());
        assert_eq!(op.captures.lock().len(), 1);
        let (capture_id, info, streaming) = op.captures.lock()[0].clone();
        assert!(streaming);
        assert_eq!(info.stream_ids, vec![7]);

        repeat.stop().unwrap();
        assert!(!repeat.is_started());
        assert_eq!(*op.cancelled.lock(), vec![capture_id]);
    }

    #[test]
    fn deferred_preview_needs_surface_before_start() {
        let ids = Arc::new(CaptureIdAllocator::new());
        let stream = OutputStream::new_repeat(
            RepeatKind::Preview,
            None,
            PixelFormat::Rgba8888,
            1280,
            720,
            ids,
        );
        stream
            .link_input(operator(), Arc::new(CameraMetadata::unbounded()), 1)
            .unwrap();
        let repeat = stream.as_repeat().unwrap();
        assert!(repeat.is_deferred());
        assert!(stream.describe().producer.is_none());
        assert!(matches!(repeat.start(), Err(CameraError::InvalidState(_))));

        repeat
            .add_deferred_surface(SimBufferProducer::new(1280, 720))
            .unwrap();
        assert!(stream.describe().producer.is_some());
        repeat.start().unwrap();
    }

    #[test]
    fn start_requires_link() {
        let ids = Arc::new(CaptureIdAllocator::new());
        let stream = OutputStream::new_repeat(
            RepeatKind::Video,
            Some(SimBufferProducer::new(640, 480)),
            PixelFormat::YCbCr420Sp,
            640,
            480,
            ids,
        );
        let err = stream.as_repeat().unwrap().start().unwrap_err();
        assert!(matches!(err, CameraError::InvalidState(_)));
        assert!(stream.as_capture().is_none());
    }
}
