use crate::bounding_box::PredictionSet;
use opencv::core::Mat;
use parking_lot::Mutex;

#[derive(Debug, Clone)]
pub struct Frame {
    pub seq: u64,
    pub mat: Mat,
}

#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub frame: Option<Frame>,
    pub predictions: Option<PredictionSet>,
}

impl Snapshot {
    pub fn prediction_lag(&self) -> Option<u64> {
        match (&self.frame, &self.predictions) {
            (Some(frame), Some(predictions)) => {
                Some(frame.seq.saturating_sub(predictions.frame_seq))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct Slots {
    next_seq: u64,
    frame: Option<Frame>,
    predictions: Option<PredictionSet>,
}

// Last write wins per field. Readers only ever get owned copies.
#[derive(Debug, Default)]
pub struct SharedState {
    slots: Mutex<Slots>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish_frame(&self, mat: Mat) -> u64 {
        let mut slots = self.slots.lock();
        slots.next_seq += 1;
        let seq = slots.next_seq;
        slots.frame = Some(Frame { seq, mat });
        seq
    }

    pub fn publish_predictions(&self, predictions: Option<PredictionSet>) {
        let mut slots = self.slots.lock();
        slots.predictions = predictions;
    }

    pub fn snapshot(&self) -> Snapshot {
        let slots = self.slots.lock();
        Snapshot {
            frame: slots.frame.clone(),
            predictions: slots.predictions.clone(),
        }
    }

    pub fn frame_count(&self) -> u64 {
        self.slots.lock().next_seq
    }
}
