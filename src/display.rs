use crate::cv_utils::{self, ChannelOrder, CvUtilsError};
use crate::shutdown::ShutdownListener;
use crate::state::{SharedState, Snapshot};
use opencv::{core::Mat, highgui};
use std::{sync::Arc, time::Duration};
use thiserror::Error;

const KEY_ESCAPE: i32 = 27;

fn wait_key_delay(delay: Duration) -> i32 {
    i32::try_from(delay.as_millis()).unwrap_or(i32::MAX).max(1)
}

#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("Cv utils error: {0}")]
    CvUtils(#[from] CvUtilsError),
    #[error("Display error: {0}")]
    OpenCvError(#[from] opencv::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayEvent {
    Tick,
    CloseRequested,
}

pub trait DisplaySurface {
    fn channel_order(&self) -> ChannelOrder;
    fn present(&mut self, image: &Mat) -> Result<(), DisplayError>;
    fn wait_event(&mut self, delay: Duration) -> Result<DisplayEvent, DisplayError>;
    fn close(&mut self) -> Result<(), DisplayError>;
}

pub struct HighGuiWindow {
    title: String,
    presented: bool,
}

impl HighGuiWindow {
    pub fn open(title: &str) -> Result<Self, DisplayError> {
        highgui::named_window(title, highgui::WINDOW_AUTOSIZE)?;
        Ok(Self {
            title: title.to_string(),
            presented: false,
        })
    }
}

impl DisplaySurface for HighGuiWindow {
    fn channel_order(&self) -> ChannelOrder {
        ChannelOrder::Bgr
    }

    fn present(&mut self, image: &Mat) -> Result<(), DisplayError> {
        highgui::imshow(&self.title, image)?;
        self.presented = true;
        Ok(())
    }

    fn wait_event(&mut self, delay: Duration) -> Result<DisplayEvent, DisplayError> {
        let key = highgui::wait_key(wait_key_delay(delay))?;
        if key == 'q' as i32 || key == KEY_ESCAPE {
            return Ok(DisplayEvent::CloseRequested);
        }
        // The window reports invisible until the first image lands in it.
        if self.presented
            && highgui::get_window_property(&self.title, highgui::WND_PROP_VISIBLE)? < 1.0
        {
            return Ok(DisplayEvent::CloseRequested);
        }
        Ok(DisplayEvent::Tick)
    }

    fn close(&mut self) -> Result<(), DisplayError> {
        highgui::destroy_window(&self.title)?;
        Ok(())
    }
}

/// Returns `None` until a frame has been captured.
pub fn compose(snapshot: Snapshot, order: ChannelOrder) -> Result<Option<Mat>, CvUtilsError> {
    let Some(frame) = snapshot.frame else {
        return Ok(None);
    };
    let mut image = frame.mat;
    if let Some(predictions) = &snapshot.predictions {
        cv_utils::annotate(&mut image, &predictions.predictions)?;
    }
    Ok(Some(cv_utils::to_channel_order(image, order)?))
}

pub struct Renderer<D: DisplaySurface> {
    state: Arc<SharedState>,
    surface: D,
    refresh: Duration,
}

impl<D: DisplaySurface> Renderer<D> {
    pub fn new(state: Arc<SharedState>, surface: D, refresh: Duration) -> Self {
        Self {
            state,
            surface,
            refresh,
        }
    }

    /// Renders one frame. Returns `false` when there was nothing to show.
    pub fn render_tick(&mut self) -> Result<bool, DisplayError> {
        let snapshot = self.state.snapshot();
        if let Some(lag) = snapshot.prediction_lag() {
            tracing::trace!(lag, "Prediction frame lag");
        }
        match compose(snapshot, self.surface.channel_order())? {
            Some(image) => {
                self.surface.present(&image)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn run(&mut self, shutdown: &ShutdownListener) -> Result<(), DisplayError> {
        while !shutdown.is_shutdown() {
            if let Err(e) = self.render_tick() {
                tracing::error!("Failed to render frame: {}", e);
            }
            if self.surface.wait_event(self.refresh)? == DisplayEvent::CloseRequested {
                tracing::info!("Display close requested");
                break;
            }
        }
        Ok(())
    }

    pub fn into_surface(self) -> D {
        self.surface
    }
}
