pub mod app;
pub mod bounding_box;
pub mod camera;
pub mod config;
pub mod cv_utils;
pub mod display;
pub mod prediction;
pub mod shutdown;
pub mod state;
pub mod telemetry;

pub use app::run_app;
