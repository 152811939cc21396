// camsvc/examples/session_demo.rs
//
// 用仿真 Host 跑一遍完整的会话流程：配置 → 预览 → 拍照 → 换镜头 → 释放

use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use camsvc::prelude::*;
use camsvc_simulation::{sample_ability, SimBufferProducer, SimHost, SimHostConnector, SimPermissionBroker};

struct PrintStatus;

impl ServiceCallback for PrintStatus {
    fn on_camera_status(&self, camera_id: &str, status: CameraStatus) {
        println!("camera {} -> {:?}", camera_id, status);
    }

    fn on_flashlight_status(&self, camera_id: &str, status: FlashStatus) {
        println!("flashlight {} -> {:?}", camera_id, status);
    }
}

fn main() -> Result<()> {
    // RUST_LOG=camsvc=debug 可以看到驱动调用细节
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // 1. 仿真 Host：后置 + 前置两个相机
    let host = SimHost::new("camera_service")
        .with_camera("back", sample_ability(1, 90))
        .with_camera("front", sample_ability(2, 270));
    let connector = Arc::new(SimHostConnector::new().with_host(host.clone()));
    let permissions = Arc::new(SimPermissionBroker::new());

    let service = CameraService::new(ServiceConfig::new(), connector, permissions);
    service.start();

    let me = ClientIdentity::new(std::process::id() as Pid, 1000, 42);
    service.set_callback(me.pid, Arc::new(PrintStatus));

    for (id, ability) in service.get_cameras() {
        let view = CameraAbility::new(&ability);
        println!("found {} ({:?}, sensor {}°)", id, view.position(), view.sensor_orientation());
    }

    // 2. 预览 + 拍照
    let preview_surface: Arc<dyn BufferProducer> = SimBufferProducer::new(1280, 720);
    let photo_surface: Arc<dyn BufferProducer> = SimBufferProducer::new(4000, 3000);
    let preview = service.create_preview_output(Some(preview_surface), PixelFormat::YCbCr420Sp, 1280, 720)?;
    let photo = service.create_photo_output(Some(photo_surface), PixelFormat::Jpeg, 4000, 3000)?;

    let back = service.create_camera_device(&me, "back")?;
    let session = service.create_capture_session(&me);
    session.begin_config()?;
    session.add_input(&back)?;
    session.add_output(&preview)?;
    session.add_output(&photo)?;
    session.commit_config()?;
    session.start()?;
    info!(streams = session.committed_streams().len(), "Preview running");

    if let Some(capture) = photo.as_capture() {
        let ticket = capture.capture(&CameraMetadata::unbounded())?;
        println!("photo #{} rotation {}°", ticket.capture_id, ticket.rotation);
    }

    // 3. 换到前置：流保留 ID，在新设备上重建
    let front = service.create_camera_device(&me, "front")?;
    session.begin_config()?;
    session.remove_input(&back)?;
    session.add_input(&front)?;
    session.commit_config()?;
    session.start()?;

    #[cfg(feature = "serialize")]
    println!("{}", service.dump().to_json()?);

    // 4. 清理
    session.release()?;
    service.stop();
    println!("driver calls: {}", host.journal().len());
    Ok(())
}
