use crate::bounding_box::{Prediction, PredictionSet};
use crate::config::InferenceConfig;
use crate::cv_utils::{self, CvUtilsError};
use crate::shutdown::ShutdownListener;
use crate::state::SharedState;
use opencv::core::Mat;
use serde::Deserialize;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use thiserror::Error;
use tokio::{
    task::{JoinError, JoinHandle},
    time::{interval, timeout, MissedTickBehavior},
};
use tracing::instrument;

const MULTIPART_BOUNDARY: &str = "sleep-detection-frame-boundary";

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Cv utils error: {0}")]
    OpenCvUtilsError(#[from] CvUtilsError),
    #[error("Inference request failed: {0}")]
    Transport(Box<ureq::Error>),
    #[error("Inference service answered with status {0}")]
    UnexpectedStatus(u16),
    #[error("Failed to read inference response: {0}")]
    ReadResponse(#[from] std::io::Error),
    #[error("Malformed inference response: {0}")]
    MalformedResponse(#[from] serde_json::Error),
}

/// Anything able to turn a frame into predictions. Calls block.
pub trait Detector: Send + Sync + 'static {
    fn detect(&self, frame: &Mat) -> Result<Vec<Prediction>, InferenceError>;
}

#[derive(Debug, Deserialize)]
struct InferenceResponse {
    predictions: Vec<Prediction>,
}

pub fn parse_response(body: &str) -> Result<Vec<Prediction>, InferenceError> {
    let response: InferenceResponse = serde_json::from_str(body)?;
    Ok(response.predictions)
}

fn part_header() -> String {
    format!(
        concat!(
            "--{}\r\n",
            "Content-Disposition: form-data; name=\"file\"; filename=\"frame.jpg\"\r\n",
            "Content-Type: image/jpeg\r\n\r\n"
        ),
        MULTIPART_BOUNDARY
    )
}

fn multipart_body(image_data: &[u8]) -> Vec<u8> {
    let mut body = part_header().into_bytes();
    body.extend_from_slice(image_data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", MULTIPART_BOUNDARY).as_bytes());
    body
}

pub struct InferenceClient {
    agent: ureq::Agent,
    endpoint: String,
    request_url: String,
}

impl InferenceClient {
    pub fn new(config: &InferenceConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(config.get_timeout())
            .build();
        Self {
            agent,
            endpoint: config.get_endpoint(),
            request_url: config.get_request_url(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    #[instrument(
        skip(self, image_data),
        fields(endpoint = %self.endpoint, bytes = image_data.len())
    )]
    pub fn predict(&self, image_data: &[u8]) -> Result<Vec<Prediction>, InferenceError> {
        let content_type = format!("multipart/form-data; boundary={}", MULTIPART_BOUNDARY);
        let response = match self
            .agent
            .post(&self.request_url)
            .set("Content-Type", &content_type)
            .send_bytes(&multipart_body(image_data))
        {
            Ok(response) => response,
            Err(ureq::Error::Status(code, _)) => {
                return Err(InferenceError::UnexpectedStatus(code));
            }
            Err(e) => return Err(InferenceError::Transport(Box::new(e))),
        };

        if response.status() != 200 {
            return Err(InferenceError::UnexpectedStatus(response.status()));
        }

        let body = response.into_string()?;
        let predictions = parse_response(&body)?;
        tracing::debug!(count = predictions.len(), "Received predictions");
        Ok(predictions)
    }
}

impl Detector for InferenceClient {
    fn detect(&self, frame: &Mat) -> Result<Vec<Prediction>, InferenceError> {
        let image_data = cv_utils::encode_jpg(frame)?;
        self.predict(&image_data)
    }
}

#[derive(Error, Debug)]
pub enum PredictionError {
    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),
    #[error("Inference call exceeded {0:?}")]
    Timeout(Duration),
    #[error("Inference worker failed: {0}")]
    Worker(#[from] JoinError),
}

// Cleared when the blocking call returns, even if it outlived its timeout.
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Periodically sends the latest frame to a [`Detector`] and publishes the
/// outcome. Failed rounds publish the absent value.
pub struct InferencePoller<D: Detector> {
    detector: Arc<D>,
    state: Arc<SharedState>,
    period: Duration,
    call_timeout: Duration,
    in_flight: Arc<AtomicBool>,
}

impl<D: Detector> InferencePoller<D> {
    pub fn new(detector: Arc<D>, state: Arc<SharedState>, config: &InferenceConfig) -> Self {
        Self {
            detector,
            state,
            period: config.get_period(),
            call_timeout: config.get_timeout(),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn spawn(self, shutdown: ShutdownListener) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(self, mut shutdown: ShutdownListener) {
        tracing::info!(period_ms = self.period.as_millis() as u64, "Inference polling started");
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {},
                _ = shutdown.wait() => break,
            }
            if shutdown.is_shutdown() {
                break;
            }

            tokio::select! {
                result = self.predict_latest() => match result {
                    Ok(Some(predictions)) => {
                        tracing::debug!(
                            frame_seq = predictions.frame_seq,
                            count = predictions.len(),
                            "Publishing predictions"
                        );
                        self.state.publish_predictions(Some(predictions));
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::error!("Inference round failed: {}", e);
                        self.state.publish_predictions(None);
                    }
                },
                _ = shutdown.wait() => break,
            }
        }
        tracing::info!("Inference polling stopped");
    }

    /// Runs one inference round against the latest frame. `Ok(None)` means
    /// no frame has been captured yet, or a call abandoned by an earlier
    /// timeout is still running.
    pub async fn predict_latest(&self) -> Result<Option<PredictionSet>, PredictionError> {
        let Some(frame) = self.state.snapshot().frame else {
            return Ok(None);
        };
        if self.in_flight.swap(true, Ordering::AcqRel) {
            tracing::debug!("Previous inference call still running, skipping round");
            return Ok(None);
        }
        let guard = InFlightGuard(self.in_flight.clone());
        let frame_seq = frame.seq;
        let detector = self.detector.clone();
        let call = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            detector.detect(&frame.mat)
        });

        let predictions = timeout(self.call_timeout, call)
            .await
            .map_err(|_| PredictionError::Timeout(self.call_timeout))???;

        Ok(Some(PredictionSet::new(frame_seq, predictions)))
    }
}
