use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use camsvc_core::ability::{CameraAbility, CameraPosition};
use camsvc_core::descriptor::{CaptureInfo, StreamErrorKind};
use camsvc_core::error::{CameraError, Result};
use camsvc_core::metadata::{tags, CameraMetadata};

use super::OutputStream;
use crate::callbacks::CaptureStreamCallback;

pub(super) struct CaptureStream {
    /// 本次 capture 调用期间占用的 ID
    pending_capture_id: Mutex<Option<i32>>,
    callback: Mutex<Option<Arc<dyn CaptureStreamCallback>>>,
}

impl CaptureStream {
    pub(super) fn new() -> Self {
        Self {
            pending_capture_id: Mutex::new(None),
            callback: Mutex::new(None),
        }
    }

    fn callback(&self) -> Option<Arc<dyn CaptureStreamCallback>> {
        self.callback.lock().clone()
    }
}

/// 一次拍照请求的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureTicket {
    pub capture_id: i32,
    /// 最终下发的 JPEG 旋转角度
    pub rotation: i32,
}

/// 拍照角度 = 传感器角度 + 前置镜像修正 + 客户端请求角度 (mod 360)
fn capture_rotation(ability: &CameraMetadata, request: &CameraMetadata) -> i32 {
    let view = CameraAbility::new(ability);
    let mut rotation = view.sensor_orientation();
    if view.position() == CameraPosition::Front
        && request.get_u8(tags::CONTROL_CAPTURE_MIRROR) == Some(1)
    {
        rotation += 180;
    }
    rotation += request.get_i32(tags::JPEG_ORIENTATION).unwrap_or(0);
    rotation.rem_euclid(360)
}

/// 拍照流的专有操作
pub struct Capturing<'a> {
    stream: &'a OutputStream,
    capture: &'a CaptureStream,
}

impl<'a> Capturing<'a> {
    pub(super) fn new(stream: &'a OutputStream, capture: &'a CaptureStream) -> Self {
        Self { stream, capture }
    }

    pub fn set_callback(&self, callback: Arc<dyn CaptureStreamCallback>) {
        *self.capture.callback.lock() = Some(callback);
    }

    /// 正在进行中的 capture ID (只在驱动调用期间非空)
    pub fn pending_capture_id(&self) -> Option<i32> {
        *self.capture.pending_capture_id.lock()
    }

    /// 单次拍照
    ///
    /// `settings` 为空时以设备 Ability 作为下发参数。
    pub fn capture(&self, settings: &CameraMetadata) -> Result<CaptureTicket> {
        let ctx = self.stream.linked_context()?;
        let mut pending = self.capture.pending_capture_id.lock();
        if pending.is_some() {
            return Err(CameraError::invalid_state("capture already in progress"));
        }

        let source = if settings.is_empty() {
            ctx.ability.as_ref()
        } else {
            settings
        };
        let mut payload = CameraMetadata::unbounded().overlaid(source);
        let rotation = capture_rotation(&ctx.ability, &payload);
        payload.set_i32(tags::JPEG_ORIENTATION, &[rotation])?;

        let capture_id = self.stream.capture_ids().allocate();
        *pending = Some(capture_id);
        let info = CaptureInfo {
            stream_ids: vec![ctx.stream_id],
            settings: Arc::new(payload),
            enable_shutter_callback: true,
        };
        let result = ctx.operator.capture(capture_id, &info, false);
        *pending = None;

        result.map_err(|status| {
            warn!(stream_id = ctx.stream_id, capture_id, %status, "Capture failed");
            CameraError::from(status)
        })?;
        info!(stream_id = ctx.stream_id, capture_id, rotation, "Capture issued");
        Ok(CaptureTicket {
            capture_id,
            rotation,
        })
    }

    pub(crate) fn on_started(&self, capture_id: i32) {
        if let Some(cb) = self.capture.callback() {
            cb.on_capture_started(capture_id);
        }
    }

    pub(crate) fn on_ended(&self, capture_id: i32, frame_count: i32) {
        if let Some(cb) = self.capture.callback() {
            cb.on_capture_ended(capture_id, frame_count);
        }
    }

    pub(crate) fn on_error(&self, capture_id: i32, error: StreamErrorKind) {
        if let Some(cb) = self.capture.callback() {
            cb.on_capture_error(capture_id, error);
        }
    }

    pub(crate) fn on_shutter(&self, capture_id: i32, timestamp: u64) {
        if let Some(cb) = self.capture.callback() {
            cb.on_frame_shutter(capture_id, timestamp);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::operator;
    use super::super::CaptureIdAllocator;
    use super::*;
    use camsvc_core::pixel_format::PixelFormat;
    use camsvc_simulation::{sample_ability, SimBufferProducer};

    fn photo() -> Arc<OutputStream> {
        OutputStream::new_capture(
            SimBufferProducer::new(1920, 1080),
            PixelFormat::Jpeg,
            1920,
            1080,
            Arc::new(CaptureIdAllocator::new()),
        )
    }

    #[test]
    fn rotation_sums_sensor_mirror_and_request() {
        let front = sample_ability(2, 270);
        let mut request = CameraMetadata::unbounded();
        request.set_u8(tags::CONTROL_CAPTURE_MIRROR, &[1]).unwrap();
        request.set_i32(tags::JPEG_ORIENTATION, &[90]).unwrap();
        // 270 + 180 + 90
        assert_eq!(capture_rotation(&front, &request), 180);

        let back = sample_ability(1, 90);
        assert_eq!(capture_rotation(&back, &request), 180);
        assert_eq!(capture_rotation(&back, &CameraMetadata::unbounded()), 90);
    }

    #[test]
    fn empty_settings_fall_back_to_ability() {
        let stream = photo();
        let op = operator();
        stream
            .link_input(op.clone(), Arc::new(sample_ability(1, 90)), 4)
            .unwrap();

        let ticket = stream
            .as_capture()
            .unwrap()
            .capture(&CameraMetadata::unbounded())
            .unwrap();
        assert_eq!(ticket.rotation, 90);

        let captures = op.captures.lock();
        let (id, info, streaming) = &captures[0];
        assert_eq!(*id, ticket.capture_id);
        assert!(!streaming);
        assert_eq!(info.settings.get_u8(tags::ABILITY_CAMERA_POSITION), Some(1));
        assert_eq!(info.settings.get_i32(tags::JPEG_ORIENTATION), Some(90));
    }

    #[test]
    fn capture_ids_are_not_reused() {
        let stream = photo();
        stream
            .link_input(operator(), Arc::new(sample_ability(1, 0)), 1)
            .unwrap();
        let capture = stream.as_capture().unwrap();

        let first = capture.capture(&CameraMetadata::unbounded()).unwrap();
        assert_eq!(capture.pending_capture_id(), None);
        let second = capture.capture(&CameraMetadata::unbounded()).unwrap();
        assert_eq!(capture.pending_capture_id(), None);
        assert_ne!(first.capture_id, second.capture_id);
    }

    #[test]
    fn unlinked_capture_is_rejected() {
        let stream = photo();
        let err = stream
            .as_capture()
            .unwrap()
            .capture(&CameraMetadata::unbounded())
            .unwrap_err();
        assert!(matches!(err, CameraError::InvalidState(_)));
    }
}
