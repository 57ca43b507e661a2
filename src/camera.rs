use crate::config::CameraConfig;
use crate::cv_utils::{self, CvUtilsError};
use crate::shutdown::ShutdownListener;
use crate::state::SharedState;
use opencv::{core::Mat, core::Size, prelude::*, videoio};
use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::task::JoinHandle;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to open camera: {0}")]
    OpenCameraFailed(opencv::Error),
    #[error("Camera device {0} could not be opened")]
    NotOpened(i32),
    #[error("Failed to read frame: {0}")]
    ReadFrameFailed(opencv::Error),
    #[error("Failed to release camera: {0}")]
    ReleaseFailed(opencv::Error),
    #[error("Camera has already been released")]
    Released,
}

pub trait FrameSource: Send + Sync + 'static {
    /// `Ok(None)` means the device answered without a usable image.
    fn read_frame(&self) -> Result<Option<Mat>, CameraError>;
}

pub struct Camera {
    device_index: i32,
    capture: Mutex<Option<videoio::VideoCapture>>,
}

impl Camera {
    pub fn open(config: &CameraConfig) -> Result<Self, CameraError> {
        let capture = videoio::VideoCapture::new(config.device_index, videoio::CAP_ANY)
            .map_err(CameraError::OpenCameraFailed)?;
        if !capture.is_opened().map_err(CameraError::OpenCameraFailed)? {
            return Err(CameraError::NotOpened(config.device_index));
        }
        tracing::info!(device = config.device_index, "Camera opened");
        Ok(Self {
            device_index: config.device_index,
            capture: Mutex::new(Some(capture)),
        })
    }

    pub fn release(&self) -> Result<(), CameraError> {
        let mut slot = self.capture.lock();
        let mut capture = slot.take().ok_or(CameraError::Released)?;
        capture.release().map_err(CameraError::ReleaseFailed)?;
        tracing::info!(device = self.device_index, "Camera released");
        Ok(())
    }
}

impl FrameSource for Camera {
    fn read_frame(&self) -> Result<Option<Mat>, CameraError> {
        let mut slot = self.capture.lock();
        let cam = slot.as_mut().ok_or(CameraError::Released)?;
        let mut frame = Mat::default();
        let grabbed = cam.read(&mut frame).map_err(CameraError::ReadFrameFailed)?;
        if grabbed && !frame.empty() {
            Ok(Some(frame))
        } else {
            Ok(None)
        }
    }
}

pub struct FramePoller<S: FrameSource> {
    source: Arc<S>,
    state: Arc<SharedState>,
    frame_size: Size,
    retry_delay: Duration,
}

impl<S: FrameSource> FramePoller<S> {
    pub fn new(source: Arc<S>, state: Arc<SharedState>, config: &CameraConfig) -> Self {
        Self {
            source,
            state,
            frame_size: config.get_frame_size(),
            retry_delay: config.get_read_retry_delay(),
        }
    }

    pub fn spawn(self, shutdown: ShutdownListener) -> JoinHandle<()> {
        tokio::task::spawn_blocking(move || self.run(&shutdown))
    }

    pub fn run(&self, shutdown: &ShutdownListener) {
        tracing::info!(
            width = self.frame_size.width,
            height = self.frame_size.height,
            "Frame capture started"
        );
        while !shutdown.is_shutdown() {
            match self.poll_once() {
                Ok(Some(_)) => {}
                Ok(None) => std::thread::sleep(self.retry_delay),
                Err(e) => {
                    tracing::debug!("Frame capture failed: {}", e);
                    std::thread::sleep(self.retry_delay);
                }
            }
        }
        tracing::info!("Frame capture stopped");
    }

    pub fn poll_once(&self) -> Result<Option<u64>, FramePollError> {
        let Some(raw) = self.source.read_frame()? else {
            return Ok(None);
        };
        let frame = cv_utils::resize_frame(&raw, self.frame_size)?;
        Ok(Some(self.state.publish_frame(frame)))
    }
}

#[derive(Error, Debug)]
pub enum FramePollError {
    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("Cv utils error: {0}")]
    CvUtils(#[from] CvUtilsError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cv_utils::solid_frame;
    use crate::shutdown::ShutdownSignal;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::time::{sleep, timeout};

    struct MockSource {
        rows: i32,
        cols: i32,
        reads: AtomicU64,
        fail_every: u64,
    }

    impl MockSource {
        fn new(rows: i32, cols: i32) -> Self {
            Self {
                rows,
                cols,
                reads: AtomicU64::new(0),
                fail_every: 0,
            }
        }
    }

    impl FrameSource for MockSource {
        fn read_frame(&self) -> Result<Option<Mat>, CameraError> {
            let read = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
            std::thread::sleep(Duration::from_millis(1));
            if self.fail_every > 0 && read % self.fail_every == 0 {
                return Err(CameraError::Released);
            }
            Ok(Some(solid_frame(self.rows, self.cols, (1.0, 2.0, 3.0))))
        }
    }

    struct EmptySource;

    impl FrameSource for EmptySource {
        fn read_frame(&self) -> Result<Option<Mat>, CameraError> {
            Ok(None)
        }
    }

    fn make_poller<S: FrameSource>(source: S, state: Arc<SharedState>) -> FramePoller<S> {
        FramePoller::new(Arc::new(source), state, &CameraConfig::default())
    }

    #[test]
    fn test_poll_once_publishes_resized_frames() {
        for (rows, cols) in [(1080, 1920), (240, 320)] {
            let state = Arc::new(SharedState::new());
            let poller = make_poller(MockSource::new(rows, cols), state.clone());

            let seq = poller.poll_once().unwrap();
            assert_eq!(seq, Some(1));

            let frame = state.snapshot().frame.unwrap();
            assert_eq!(frame.mat.size().unwrap(), Size::new(640, 640));
        }
    }

    #[test]
    fn test_poll_once_without_frame_publishes_nothing() {
        let state = Arc::new(SharedState::new());
        let poller = make_poller(EmptySource, state.clone());

        assert_eq!(poller.poll_once().unwrap(), None);
        assert!(state.snapshot().frame.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_read_failures_do_not_stop_capture() {
        let state = Arc::new(SharedState::new());
        let mut source = MockSource::new(48, 64);
        source.fail_every = 2;
        let signal = ShutdownSignal::new();
        let handle = make_poller(source, state.clone()).spawn(signal.subscribe());

        sleep(Duration::from_millis(100)).await;
        signal.trigger();
        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();

        assert!(state.frame_count() > 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_stops_publishing() {
        let state = Arc::new(SharedState::new());
        let signal = ShutdownSignal::new();
        let handle = make_poller(MockSource::new(48, 64), state.clone()).spawn(signal.subscribe());

        sleep(Duration::from_millis(50)).await;
        signal.trigger();
        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();

        let published = state.frame_count();
        assert!(published > 0);
        sleep(Duration::from_millis(50)).await;
        assert_eq!(state.frame_count(), published);
    }
}
