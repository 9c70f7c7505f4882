mod annotate;
mod bounding_box;
mod detection;
mod pipeline;
mod prediction;
mod routes;
mod run_folder;
mod server;
mod staging;
mod telemetry;
mod upload;

pub mod app;
pub mod config;

pub use app::start_app;
