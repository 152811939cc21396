use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use camsvc_core::descriptor::{
    CaptureEndedInfo, CaptureErrorInfo, CaptureInfo, OperationMode, ResultCallbackMode, StreamInfo,
};
use camsvc_core::error::{DriverStatus, HalResult};
use camsvc_core::metadata::CameraMetadata;
use camsvc_core::status::{HalCameraEvent, HalCameraStatus, HalErrorType, HalFlashlightStatus};
use camsvc_core::traits::{
    CameraDeviceHal, CameraHost, DeviceCallback, HostCallback, HostConnector, StreamOperator,
    StreamOperatorCallback,
};

/// 驱动调用日志条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HalCall {
    OpenCamera(String),
    CloseCamera(String),
    UpdateSettings(String),
    SetResultMode(String, ResultCallbackMode),
    EnableResult(String, Vec<u32>),
    DisableResult(String, Vec<u32>),
    CreateStreams(String, Vec<i32>),
    CommitStreams(String),
    ReleaseStreams(String, Vec<i32>),
    Capture {
        camera_id: String,
        capture_id: i32,
        stream_ids: Vec<i32>,
        is_streaming: bool,
    },
    CancelCapture(String, i32),
    SetFlashlight(String, bool),
}

/// 故障注入点，每个只生效一次
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    Open,
    UpdateSettings,
    CreateStreams,
    CommitStreams,
    Capture,
    CancelCapture,
}

#[derive(Default)]
struct HostState {
    cameras: BTreeMap<String, CameraMetadata>,
    journal: Vec<HalCall>,
    faults: HashMap<FaultPoint, DriverStatus>,
    callback: Option<Arc<dyn HostCallback>>,
    devices: HashMap<String, Arc<SimDevice>>,
    /// camera_id -> 已创建的流 (stream_id -> 描述符)
    streams: HashMap<String, BTreeMap<i32, StreamInfo>>,
    last_capture: Option<(String, CaptureInfo)>,
    pushed_settings: HashMap<String, CameraMetadata>,
    ability_queries: usize,
}

/// 内存中的 Camera Host
///
/// `Clone` 共享同一份状态，测试侧持有一份用来注入事件和检查调用日志。
#[derive(Clone)]
pub struct SimHost {
    name: String,
    state: Arc<Mutex<HostState>>,
}

impl std::fmt::Debug for SimHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimHost").field("name", &self.name).finish()
    }
}

impl SimHost {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(HostState::default())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 静默添加相机 (Host 连接之前的初始枚举)
    pub fn with_camera(self, camera_id: impl Into<String>, ability: CameraMetadata) -> Self {
        self.state.lock().cameras.insert(camera_id.into(), ability);
        self
    }

    /// 热插拔：添加相机并上报 DeviceAdded
    pub fn plug_camera(&self, camera_id: &str, ability: CameraMetadata) {
        let callback = {
            let mut state = self.state.lock();
            state.cameras.insert(camera_id.to_string(), ability);
            state.callback.clone()
        };
        if let Some(cb) = callback {
            cb.on_camera_event(camera_id, HalCameraEvent::DeviceAdded);
        }
    }

    /// 热插拔：移除相机并上报 DeviceRemoved
    pub fn unplug_camera(&self, camera_id: &str) {
        let callback = {
            let mut state = self.state.lock();
            state.cameras.remove(camera_id);
            state.callback.clone()
        };
        if let Some(cb) = callback {
            cb.on_camera_event(camera_id, HalCameraEvent::DeviceRemoved);
        }
    }

    pub fn emit_camera_status(&self, camera_id: &str, status: HalCameraStatus) {
        let callback = self.state.lock().callback.clone();
        if let Some(cb) = callback {
            cb.on_camera_status(camera_id, status);
        }
    }

    pub fn emit_flashlight_status(&self, camera_id: &str, status: HalFlashlightStatus) {
        let callback = self.state.lock().callback.clone();
        if let Some(cb) = callback {
            cb.on_flashlight_status(camera_id, status);
        }
    }

    /// 让下一次对应调用返回 `status`
    pub fn fail_next(&self, point: FaultPoint, status: DriverStatus) {
        self.state.lock().faults.insert(point, status);
    }

    pub fn journal(&self) -> Vec<HalCall> {
        self.state.lock().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.state.lock().journal.clear();
    }

    /// 统计某类调用的次数
    pub fn count_calls(&self, pred: impl Fn(&HalCall) -> bool) -> usize {
        self.state.lock().journal.iter().filter(|c| pred(c)).count()
    }

    pub fn is_open(&self, camera_id: &str) -> bool {
        self.state.lock().devices.contains_key(camera_id)
    }

    pub fn ability_queries(&self) -> usize {
        self.state.lock().ability_queries
    }

    /// 驱动侧当前存在的流 ID
    pub fn live_stream_ids(&self, camera_id: &str) -> Vec<i32> {
        self.state
            .lock()
            .streams
            .get(camera_id)
            .map(|s| s.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn last_capture(&self) -> Option<(String, CaptureInfo)> {
        self.state.lock().last_capture.clone()
    }

    pub fn pushed_settings(&self, camera_id: &str) -> Option<CameraMetadata> {
        self.state.lock().pushed_settings.get(camera_id).cloned()
    }

    /// 模拟驱动上报设备错误
    pub fn inject_device_error(&self, camera_id: &str, error: HalErrorType, vendor_code: i32) {
        let device = self.state.lock().devices.get(camera_id).cloned();
        if let Some(dev) = device {
            dev.callback.on_error(error, vendor_code);
        }
    }

    pub fn emit_result(&self, camera_id: &str, timestamp: u64, result: &CameraMetadata) {
        let device = self.state.lock().devices.get(camera_id).cloned();
        if let Some(dev) = device {
            dev.callback.on_result(timestamp, result);
        }
    }

    fn operator_callback(&self, camera_id: &str) -> Option<Arc<dyn StreamOperatorCallback>> {
        let device = self.state.lock().devices.get(camera_id).cloned()?;
        let operator = device.operator.lock().clone()?;
        Some(operator.callback.clone())
    }

    pub fn emit_capture_started(&self, camera_id: &str, capture_id: i32, stream_ids: &[i32]) {
        if let Some(cb) = self.operator_callback(camera_id) {
            cb.on_capture_started(capture_id, stream_ids);
        }
    }

    pub fn emit_capture_ended(&self, camera_id: &str, capture_id: i32, infos: &[CaptureEndedInfo]) {
        if let Some(cb) = self.operator_callback(camera_id) {
            cb.on_capture_ended(capture_id, infos);
        }
    }

    pub fn emit_capture_error(&self, camera_id: &str, capture_id: i32, infos: &[CaptureErrorInfo]) {
        if let Some(cb) = self.operator_callback(camera_id) {
            cb.on_capture_error(capture_id, infos);
        }
    }

    pub fn emit_frame_shutter(&self, camera_id: &str, capture_id: i32, stream_ids: &[i32], ts: u64) {
        if let Some(cb) = self.operator_callback(camera_id) {
            cb.on_frame_shutter(capture_id, stream_ids, ts);
        }
    }

    fn record(&self, call: HalCall) {
        debug!(host = %self.name, ?call, "sim hal call");
        self.state.lock().journal.push(call);
    }

    fn take_fault(&self, point: FaultPoint) -> HalResult<()> {
        match self.state.lock().faults.remove(&point) {
            Some(status) => Err(status),
            None => Ok(()),
        }
    }
}

impl CameraHost for SimHost {
    fn set_callback(&self, callback: Arc<dyn HostCallback>) {
        self.state.lock().callback = Some(callback);
    }

    fn camera_ids(&self) -> HalResult<Vec<String>> {
        Ok(self.state.lock().cameras.keys().cloned().collect())
    }

    fn camera_ability(&self, camera_id: &str) -> HalResult<CameraMetadata> {
        let mut state = self.state.lock();
        state.ability_queries += 1;
        state
            .cameras
            .get(camera_id)
            .cloned()
            .ok_or(DriverStatus::InvalidArgument)
    }

    fn open_camera(
        &self,
        camera_id: &str,
        callback: Arc<dyn DeviceCallback>,
    ) -> HalResult<Arc<dyn CameraDeviceHal>> {
        self.record(HalCall::OpenCamera(camera_id.to_string()));
        self.take_fault(FaultPoint::Open)?;

        let mut state = self.state.lock();
        if !state.cameras.contains_key(camera_id) {
            return Err(DriverStatus::InvalidArgument);
        }
        if state.devices.contains_key(camera_id) {
            return Err(DriverStatus::CameraBusy);
        }
        let device = Arc::new(SimDevice {
            camera_id: camera_id.to_string(),
            host: self.clone(),
            callback,
            operator: Mutex::new(None),
        });
        state.devices.insert(camera_id.to_string(), device.clone());
        info!(host = %self.name, camera_id, "sim camera opened");
        Ok(device)
    }

    fn set_flashlight(&self, camera_id: &str, enable: bool) -> HalResult<()> {
        self.record(HalCall::SetFlashlight(camera_id.to_string(), enable));
        if !self.state.lock().cameras.contains_key(camera_id) {
            return Err(DriverStatus::InvalidArgument);
        }
        Ok(())
    }
}

pub struct SimDevice {
    camera_id: String,
    host: SimHost,
    callback: Arc<dyn DeviceCallback>,
    operator: Mutex<Option<Arc<SimStreamOperator>>>,
}

impl CameraDeviceHal for SimDevice {
    fn stream_operator(
        &self,
        callback: Arc<dyn StreamOperatorCallback>,
    ) -> HalResult<Arc<dyn StreamOperator>> {
        let mut slot = self.operator.lock();
        let op = slot
            .get_or_insert_with(|| {
                Arc::new(SimStreamOperator {
                    camera_id: self.camera_id.clone(),
                    host: self.host.clone(),
                    callback,
                })
            })
            .clone();
        Ok(op)
    }

    fn update_settings(&self, settings: &CameraMetadata) -> HalResult<()> {
        self.host
            .record(HalCall::UpdateSettings(self.camera_id.clone()));
        self.host.take_fault(FaultPoint::UpdateSettings)?;
        let mut state = self.host.state.lock();
        let pushed = state
            .pushed_settings
            .entry(self.camera_id.clone())
            .or_default();
        *pushed = pushed.overlaid(settings);
        Ok(())
    }

    fn set_result_mode(&self, mode: ResultCallbackMode) -> HalResult<()> {
        self.host
            .record(HalCall::SetResultMode(self.camera_id.clone(), mode));
        Ok(())
    }

    fn enable_result(&self, tags: &[u32]) -> HalResult<()> {
        self.host
            .record(HalCall::EnableResult(self.camera_id.clone(), tags.to_vec()));
        Ok(())
    }

    fn disable_result(&self, tags: &[u32]) -> HalResult<()> {
        self.host
            .record(HalCall::DisableResult(self.camera_id.clone(), tags.to_vec()));
        Ok(())
    }

    fn close(&self) {
        self.host.record(HalCall::CloseCamera(self.camera_id.clone()));
        let mut state = self.host.state.lock();
        state.devices.remove(&self.camera_id);
        state.streams.remove(&self.camera_id);
        self.operator.lock().take();
    }
}

pub struct SimStreamOperator {
    camera_id: String,
    host: SimHost,
    callback: Arc<dyn StreamOperatorCallback>,
}

impl StreamOperator for SimStreamOperator {
    fn create_streams(&self, infos: &[StreamInfo]) -> HalResult<()> {
        let ids = infos.iter().map(|i| i.stream_id).collect();
        self.host
            .record(HalCall::CreateStreams(self.camera_id.clone(), ids));
        self.host.take_fault(FaultPoint::CreateStreams)?;

        let mut state = self.host.state.lock();
        let streams = state.streams.entry(self.camera_id.clone()).or_default();
        if infos.iter().any(|i| streams.contains_key(&i.stream_id)) {
            return Err(DriverStatus::InvalidArgument);
        }
        for info in infos {
            streams.insert(info.stream_id, info.clone());
        }
        Ok(())
    }

    fn commit_streams(&self, _mode: OperationMode, _settings: &CameraMetadata) -> HalResult<()> {
        self.host
            .record(HalCall::CommitStreams(self.camera_id.clone()));
        self.host.take_fault(FaultPoint::CommitStreams)
    }

    fn release_streams(&self, stream_ids: &[i32]) -> HalResult<()> {
        self.host.record(HalCall::ReleaseStreams(
            self.camera_id.clone(),
            stream_ids.to_vec(),
        ));
        let mut state = self.host.state.lock();
        if let Some(streams) = state.streams.get_mut(&self.camera_id) {
            for id in stream_ids {
                streams.remove(id);
            }
        }
        Ok(())
    }

    fn capture(&self, capture_id: i32, info: &CaptureInfo, is_streaming: bool) -> HalResult<()> {
        self.host.record(HalCall::Capture {
            camera_id: self.camera_id.clone(),
            capture_id,
            stream_ids: info.stream_ids.clone(),
            is_streaming,
        });
        self.host.take_fault(FaultPoint::Capture)?;

        let mut state = self.host.state.lock();
        let known = state
            .streams
            .get(&self.camera_id)
            .map(|s| info.stream_ids.iter().all(|id| s.contains_key(id)))
            .unwrap_or(false);
        if !known {
            return Err(DriverStatus::InvalidArgument);
        }
        state.last_capture = Some((self.camera_id.clone(), info.clone()));
        Ok(())
    }

    fn cancel_capture(&self, capture_id: i32) -> HalResult<()> {
        self.host
            .record(HalCall::CancelCapture(self.camera_id.clone(), capture_id));
        self.host.take_fault(FaultPoint::CancelCapture)
    }
}

/// 按名称返回预先注册的 SimHost
#[derive(Default)]
pub struct SimHostConnector {
    hosts: Mutex<HashMap<String, SimHost>>,
}

impl SimHostConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(self, host: SimHost) -> Self {
        self.register(host);
        self
    }

    pub fn register(&self, host: SimHost) {
        self.hosts.lock().insert(host.name().to_string(), host);
    }

    pub fn unregister(&self, name: &str) {
        self.hosts.lock().remove(name);
    }
}

impl HostConnector for SimHostConnector {
    fn connect(&self, host_name: &str) -> HalResult<Arc<dyn CameraHost>> {
        let host = self
            .hosts
            .lock()
            .get(host_name)
            .cloned()
            .ok_or(DriverStatus::MethodNotSupported)?;
        Ok(Arc::new(host))
    }
}
