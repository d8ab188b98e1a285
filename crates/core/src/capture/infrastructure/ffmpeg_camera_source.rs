use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::capture::domain::frame_source::{CaptureError, FrameSource, SourceInfo};
use crate::shared::frame::Frame;
use crate::shared::settings::CameraSettings;

type LatestFrame = Arc<Mutex<Option<Frame>>>;

/// Live camera capture via ffmpeg-next device inputs (libavdevice).
///
/// The device is opened and decoded on a dedicated thread that keeps only
/// the most recent RGB24 frame; `current_frame` hands out a copy of it.
/// Opening happens on that thread too, so no ffmpeg handle ever crosses a
/// thread boundary.
pub struct FfmpegCameraSource {
    settings: CameraSettings,
    latest: LatestFrame,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl FfmpegCameraSource {
    pub fn new(settings: CameraSettings) -> Self {
        Self {
            settings,
            latest: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    fn latest(&self) -> MutexGuard<'_, Option<Frame>> {
        self.latest.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl FrameSource for FfmpegCameraSource {
    fn open(&mut self) -> Result<SourceInfo, CaptureError> {
        if self.worker.is_some() {
            return Err(CaptureError::AlreadyOpen);
        }

        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        self.running.store(true, Ordering::Relaxed);
        let settings = self.settings.clone();
        let latest = self.latest.clone();
        let running = self.running.clone();
        let worker = std::thread::spawn(move || run_capture(settings, latest, running, ready_tx));

        match ready_rx.recv() {
            Ok(Ok(info)) => {
                log::info!(
                    "Camera {} opened at {}x{}",
                    self.settings.device,
                    info.width,
                    info.height
                );
                self.worker = Some(worker);
                Ok(info)
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::Relaxed);
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                self.running.store(false, Ordering::Relaxed);
                let _ = worker.join();
                Err(CaptureError::DeviceUnavailable(
                    "capture thread exited during open".to_string(),
                ))
            }
        }
    }

    fn is_ready(&self) -> bool {
        self.latest().is_some()
    }

    fn current_frame(&self) -> Option<Frame> {
        self.latest().clone()
    }

    fn release(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.running.store(false, Ordering::Relaxed);
        if worker.join().is_err() {
            log::error!("Camera capture thread panicked");
        }
        *self.latest() = None;
        log::info!("Camera {} released", self.settings.device);
    }
}

impl Drop for FfmpegCameraSource {
    fn drop(&mut self) {
        self.release();
    }
}

struct OpenedDevice {
    ictx: ffmpeg_next::format::context::Input,
    decoder: ffmpeg_next::decoder::Video,
    scaler: ffmpeg_next::software::scaling::Context,
    stream_index: usize,
    width: u32,
    height: u32,
}

fn open_device(settings: &CameraSettings) -> Result<OpenedDevice, CaptureError> {
    ffmpeg_next::init().map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;
    ffmpeg_next::device::register_all();

    let format = ffmpeg_next::device::input::video()
        .find(|f| f.name().split(',').any(|n| n == settings.driver))
        .ok_or_else(|| CaptureError::UnknownDriver(settings.driver.clone()))?;

    let mut options = ffmpeg_next::Dictionary::new();
    options.set(
        "video_size",
        &format!("{}x{}", settings.width, settings.height),
    );

    let ictx = ffmpeg_next::format::open_with(&settings.device, &format, options)
        .map_err(|e| CaptureError::DeviceUnavailable(format!("{}: {e}", settings.device)))?
        .input();

    let stream = ictx
        .streams()
        .best(ffmpeg_next::media::Type::Video)
        .ok_or(CaptureError::NoVideoStream)?;
    let stream_index = stream.index();

    let decoder = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())
        .and_then(|ctx| ctx.decoder().video())
        .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;

    let width = decoder.width();
    let height = decoder.height();
    if width == 0 || height == 0 {
        return Err(CaptureError::NoVideoStream);
    }

    let scaler = ffmpeg_next::software::scaling::Context::get(
        decoder.format(),
        width,
        height,
        ffmpeg_next::format::Pixel::RGB24,
        width,
        height,
        ffmpeg_next::software::scaling::Flags::BILINEAR,
    )
    .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;

    Ok(OpenedDevice {
        ictx,
        decoder,
        scaler,
        stream_index,
        width,
        height,
    })
}

fn run_capture(
    settings: CameraSettings,
    latest: LatestFrame,
    running: Arc<AtomicBool>,
    ready_tx: crossbeam_channel::Sender<Result<SourceInfo, CaptureError>>,
) {
    let mut device = match open_device(&settings) {
        Ok(device) => device,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };
    let _ = ready_tx.send(Ok(SourceInfo {
        width: device.width,
        height: device.height,
    }));

    let _clear = ClearOnExit(latest.clone());
    let mut frame_index = 0;
    let OpenedDevice {
        ictx,
        decoder,
        scaler,
        stream_index,
        width,
        height,
    } = &mut device;

    while running.load(Ordering::Relaxed) {
        let mut packet = ffmpeg_next::Packet::empty();
        match read_step(packet.read(ictx)) {
            ReadStep::Packet => {}
            ReadStep::Retry => {
                std::thread::sleep(RETRY_DELAY);
                continue;
            }
            ReadStep::Stop(reason) => {
                log::warn!("Camera {} stopped delivering frames: {reason}", settings.device);
                break;
            }
        }
        if packet.stream() != *stream_index || decoder.send_packet(&packet).is_err() {
            continue;
        }

        let mut decoded = ffmpeg_next::util::frame::video::Video::empty();
        while decoder.receive_frame(&mut decoded).is_ok() {
            let mut rgb_frame = ffmpeg_next::util::frame::video::Video::empty();
            if let Err(e) = scaler.run(&decoded, &mut rgb_frame) {
                log::warn!("Dropping camera frame {frame_index}: {e}");
                continue;
            }
            let pixels = extract_rgb_pixels(&rgb_frame, *width, *height);
            let frame = Frame::new(pixels, *width, *height, 3, frame_index);
            frame_index += 1;
            *latest.lock().unwrap_or_else(|e| e.into_inner()) = Some(frame);
        }
    }
}

const RETRY_DELAY: Duration = Duration::from_millis(5);

#[derive(Debug, PartialEq)]
enum ReadStep {
    Packet,
    Retry,
    Stop(String),
}

/// Only "try again" keeps the device loop going; end of stream and any
/// other error end it.
fn read_step(result: Result<(), ffmpeg_next::Error>) -> ReadStep {
    match result {
        Ok(()) => ReadStep::Packet,
        Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::util::error::EAGAIN => {
            ReadStep::Retry
        }
        Err(ffmpeg_next::Error::Eof) => ReadStep::Stop("end of stream".to_string()),
        Err(e) => ReadStep::Stop(e.to_string()),
    }
}

/// Empties the shared slot when the capture thread ends, so a dead device
/// stops reporting ready instead of serving its last frame forever.
struct ClearOnExit(LatestFrame);

impl Drop for ClearOnExit {
    fn drop(&mut self) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

fn extract_rgb_pixels(
    rgb_frame: &ffmpeg_next::util::frame::video::Video,
    width: u32,
    height: u32,
) -> Vec<u8> {
    let stride = rgb_frame.stride(0);
    let data = rgb_frame.data(0);
    let w = width as usize;
    let h = height as usize;

    let mut pixels = Vec::with_capacity(w * h * 3);
    for row in 0..h {
        let row_start = row * stride;
        pixels.extend_from_slice(&data[row_start..row_start + w * 3]);
    }
    pixels
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(device: &str, driver: &str) -> CameraSettings {
        CameraSettings {
            device: device.to_string(),
            driver: driver.to_string(),
            ..CameraSettings::default()
        }
    }

    #[test]
    fn test_unknown_driver_is_reported() {
        let mut source = FfmpegCameraSource::new(settings("/dev/video0", "no-such-driver"));
        let err = source.open().unwrap_err();
        assert!(matches!(err, CaptureError::UnknownDriver(ref d) if d == "no-such-driver"));
        assert!(!source.is_ready());
    }

    #[test]
    fn test_missing_device_fails_to_open() {
        let mut source = FfmpegCameraSource::new(settings(
            "/nonexistent/video99",
            &CameraSettings::default().driver,
        ));
        assert!(source.open().is_err());
        assert!(source.current_frame().is_none());
    }

    #[test]
    fn test_read_step_retries_only_on_again() {
        assert_eq!(read_step(Ok(())), ReadStep::Packet);
        assert_eq!(
            read_step(Err(ffmpeg_next::Error::Other {
                errno: ffmpeg_next::util::error::EAGAIN
            })),
            ReadStep::Retry
        );
        assert!(matches!(read_step(Err(ffmpeg_next::Error::Eof)), ReadStep::Stop(_)));
        assert!(matches!(
            read_step(Err(ffmpeg_next::Error::InvalidData)),
            ReadStep::Stop(_)
        ));
    }

    #[test]
    fn test_capture_thread_exit_clears_latest_frame() {
        let latest: LatestFrame = Arc::new(Mutex::new(Some(Frame::new(vec![0; 3], 1, 1, 3, 0))));
        let reader = latest.clone();

        std::thread::spawn(move || {
            let _clear = ClearOnExit(latest);
        })
        .join()
        .unwrap();

        assert!(reader.lock().unwrap().is_none());
    }

    #[test]
    fn test_release_without_open_is_noop() {
        let mut source = FfmpegCameraSource::new(CameraSettings::default());
        source.release();
        source.release();
        assert!(!source.is_ready());
    }
}
