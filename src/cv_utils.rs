use crate::bounding_box::Prediction;
use opencv::{
    core::{Mat, Scalar, Size, Vector},
    imgcodecs, imgproc,
    prelude::*,
};
use thiserror::Error;

const BOX_THICKNESS: i32 = 2;
const LABEL_SCALE: f64 = 0.9;
const LABEL_THICKNESS: i32 = 2;

#[derive(Error, Debug)]
pub enum CvUtilsError {
    #[error("Failed to encode frame: {0}")]
    EncodeFrameFailed(opencv::Error),
    #[error("Failed to resize frame: {0}")]
    ResizeFailed(opencv::Error),
    #[error("Cannot process an empty frame")]
    EmptyFrame,
    #[error("OpenCV error: {0}")]
    OpenCvError(opencv::Error),
}

impl From<opencv::Error> for CvUtilsError {
    fn from(err: opencv::Error) -> Self {
        CvUtilsError::OpenCvError(err)
    }
}

/// Pixel layout a display surface expects. Frames are always stored as BGR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
    Bgr,
    Rgb,
}

fn box_color() -> Scalar {
    Scalar::new(0.0, 255.0, 0.0, 0.0)
}

fn label_color() -> Scalar {
    Scalar::new(36.0, 255.0, 12.0, 0.0)
}

pub fn resize_frame(frame: &Mat, size: Size) -> Result<Mat, CvUtilsError> {
    if frame.empty() {
        return Err(CvUtilsError::EmptyFrame);
    }
    let mut resized = Mat::default();
    imgproc::resize(
        frame,
        &mut resized,
        size,
        0.0,
        0.0,
        imgproc::INTER_LINEAR,
    )
    .map_err(CvUtilsError::ResizeFailed)?;
    Ok(resized)
}

pub fn encode_jpg(frame: &Mat) -> Result<Vec<u8>, CvUtilsError> {
    let mut buf = Vector::<u8>::new();
    imgcodecs::imencode(".jpg", frame, &mut buf, &Vector::new())
        .map_err(CvUtilsError::EncodeFrameFailed)?;
    Ok(buf.into())
}

/// Draws one box and one label per prediction, in place.
pub fn annotate(frame: &mut Mat, predictions: &[Prediction]) -> Result<(), CvUtilsError> {
    for prediction in predictions {
        imgproc::rectangle_points(
            frame,
            prediction.top_left(),
            prediction.bottom_right(),
            box_color(),
            BOX_THICKNESS,
            imgproc::LINE_8,
            0,
        )?;

        imgproc::put_text(
            frame,
            &prediction.class_label,
            prediction.label_origin(),
            imgproc::FONT_HERSHEY_SIMPLEX,
            LABEL_SCALE,
            label_color(),
            LABEL_THICKNESS,
            imgproc::LINE_8,
            false,
        )?;
    }
    Ok(())
}

pub fn to_channel_order(frame: Mat, order: ChannelOrder) -> Result<Mat, CvUtilsError> {
    match order {
        ChannelOrder::Bgr => Ok(frame),
        ChannelOrder::Rgb => {
            let mut converted = Mat::default();
            imgproc::cvt_color_def(&frame, &mut converted, imgproc::COLOR_BGR2RGB)?;
            Ok(converted)
        }
    }
}

#[cfg(test)]
pub(crate) fn solid_frame(rows: i32, cols: i32, bgr: (f64, f64, f64)) -> Mat {
    Mat::new_rows_cols_with_default(
        rows,
        cols,
        opencv::core::CV_8UC3,
        Scalar::new(bgr.0, bgr.1, bgr.2, 0.0),
    )
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Vec3b, CV_8UC3};

    #[test]
    fn test_resize_downscales_and_upscales() {
        let target = Size::new(640, 640);
        for (rows, cols) in [(1080, 1920), (480, 640), (240, 320), (640, 640), (100, 50)] {
            let frame = solid_frame(rows, cols, (10.0, 20.0, 30.0));
            let resized = resize_frame(&frame, target).unwrap();

            assert_eq!(resized.size().unwrap(), target);
            assert_eq!(resized.typ(), CV_8UC3);
        }
    }

    #[test]
    fn test_resize_rejects_empty_frame() {
        let result = resize_frame(&Mat::default(), Size::new(640, 640));
        assert!(matches!(result, Err(CvUtilsError::EmptyFrame)));
    }

    #[test]
    fn test_annotate_is_idempotent_across_copies() {
        let frame = solid_frame(640, 640, (0.0, 0.0, 0.0));
        let predictions = vec![
            Prediction::new(100.0, 100.0, 40.0, 20.0, "eyes_closed"),
            Prediction::new(400.0, 300.0, 120.0, 80.0, "yawn"),
        ];

        let mut first = frame.clone();
        let mut second = frame.clone();
        annotate(&mut first, &predictions).unwrap();
        annotate(&mut second, &predictions).unwrap();

        assert_eq!(first.data_bytes().unwrap(), second.data_bytes().unwrap());
        assert_ne!(first.data_bytes().unwrap(), frame.data_bytes().unwrap());
    }

    #[test]
    fn test_annotate_draws_box_at_corners() {
        let mut frame = solid_frame(640, 640, (0.0, 0.0, 0.0));
        let predictions = vec![Prediction::new(100.0, 100.0, 40.0, 20.0, "eyes_closed")];

        annotate(&mut frame, &predictions).unwrap();

        let green = Vec3b::from([0, 255, 0]);
        assert_eq!(*frame.at_2d::<Vec3b>(100, 80).unwrap(), green);
        assert_eq!(*frame.at_2d::<Vec3b>(110, 120).unwrap(), green);
        assert_eq!(*frame.at_2d::<Vec3b>(100, 100).unwrap(), Vec3b::from([0, 0, 0]));
    }

    #[test]
    fn test_annotate_without_predictions_leaves_frame_untouched() {
        let frame = solid_frame(64, 64, (5.0, 6.0, 7.0));
        let mut copy = frame.clone();

        annotate(&mut copy, &[]).unwrap();

        assert_eq!(copy.data_bytes().unwrap(), frame.data_bytes().unwrap());
    }

    #[test]
    fn test_rgb_conversion_swaps_channels() {
        let frame = solid_frame(4, 4, (1.0, 2.0, 3.0));

        let rgb = to_channel_order(frame.clone(), ChannelOrder::Rgb).unwrap();
        let bgr = to_channel_order(frame, ChannelOrder::Bgr).unwrap();

        assert_eq!(*rgb.at_2d::<Vec3b>(0, 0).unwrap(), Vec3b::from([3, 2, 1]));
        assert_eq!(*bgr.at_2d::<Vec3b>(0, 0).unwrap(), Vec3b::from([1, 2, 3]));
    }

    #[test]
    fn test_encode_jpg_produces_jpeg_magic() {
        let frame = solid_frame(32, 32, (0.0, 128.0, 255.0));
        let encoded = encode_jpg(&frame).unwrap();

        assert_eq!(&encoded[..2], &[0xFF, 0xD8]);
    }
}
