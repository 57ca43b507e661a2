use opencv::core::Point;
use serde::Deserialize;

const LABEL_OFFSET_Y: i32 = 10;

/// One detected object as reported by the remote detector, in pixels of the
/// uploaded frame. `x`/`y` are the box center.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Prediction {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    #[serde(rename = "class")]
    pub class_label: String,
}

impl Prediction {
    pub fn new(x: f32, y: f32, width: f32, height: f32, class_label: &str) -> Self {
        Self {
            x,
            y,
            width,
            height,
            class_label: class_label.to_string(),
        }
    }

    pub fn top_left(&self) -> Point {
        Point::new(
            (self.x - self.width / 2.0) as i32,
            (self.y - self.height / 2.0) as i32,
        )
    }

    pub fn bottom_right(&self) -> Point {
        Point::new(
            (self.x + self.width / 2.0) as i32,
            (self.y + self.height / 2.0) as i32,
        )
    }

    /// Baseline origin of the label text, just above the top-left corner.
    pub fn label_origin(&self) -> Point {
        let top_left = self.top_left();
        Point::new(top_left.x, top_left.y - LABEL_OFFSET_Y)
    }
}

/// Predictions computed from the frame published with sequence `frame_seq`.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionSet {
    pub frame_seq: u64,
    pub predictions: Vec<Prediction>,
}

impl PredictionSet {
    pub fn new(frame_seq: u64, predictions: Vec<Prediction>) -> Self {
        Self {
            frame_seq,
            predictions,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.predictions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_corners_from_center() {
        let prediction = Prediction::new(100.0, 100.0, 40.0, 20.0, "eyes_closed");

        assert_eq!(prediction.top_left(), Point::new(80, 90));
        assert_eq!(prediction.bottom_right(), Point::new(120, 110));
        assert_eq!(prediction.label_origin(), Point::new(80, 80));
    }

    #[test]
    fn test_fractional_corners_truncate() {
        let prediction = Prediction::new(10.5, 20.25, 5.0, 3.0, "eyes_open");

        assert_eq!(prediction.top_left(), Point::new(8, 18));
        assert_eq!(prediction.bottom_right(), Point::new(13, 21));
    }
}
