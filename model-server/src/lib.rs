//! Vision model server
//!
//! Wraps an image classifier behind a small HTTP API:
//! - BSON request/response envelopes (`array-codec`)
//! - Request binding from body, query string, form fields and uploads
//! - Input contract checks for 64x64x3 `uint8` images and 200-class outputs
//! - A process-lifetime prediction budget

pub mod baseline;
pub mod binder;
pub mod budget;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod metrics;
pub mod model;
pub mod server;
pub mod state;
pub mod telemetry;

pub use baseline::IntensityModel;
pub use budget::PredictionBudget;
pub use config::ServerConfig;
pub use dispatch::Predictor;
pub use error::ServerError;
pub use model::{ChannelLayout, Model, ModelOutput};
pub use server::{router, serve};
pub use state::AppState;
