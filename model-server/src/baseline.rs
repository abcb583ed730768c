//! Deterministic stand-in classifier bundled with the binary.
//!
//! Scores all classes by how close they sit to the image's mean brightness,
//! so the server can be run and smoke tested without an external model.

use anyhow::ensure;
use ndarray::{Array1, Array3, Axis};

use crate::config::env_or;
use crate::error::ServerError;
use crate::model::{Model, ModelOutput, NUM_CLASSES};

/// Brightness-bucket classifier
#[derive(Debug, Clone)]
pub struct IntensityModel {
    channel_axis: usize,
}

impl IntensityModel {
    pub const fn new(channel_axis: usize) -> Self {
        Self { channel_axis }
    }

    /// Reads `CHANNEL_AXIS` (default 3).
    pub fn from_env() -> Result<Self, ServerError> {
        Ok(Self::new(env_or("CHANNEL_AXIS", 3)?))
    }
}

impl Model for IntensityModel {
    fn channel_axis(&self) -> usize {
        self.channel_axis
    }

    fn predictions(&self, image: Array3<f32>) -> anyhow::Result<ModelOutput> {
        let axis = if self.channel_axis == 1 { Axis(0) } else { Axis(2) };
        ensure!(
            image.len_of(axis) == 3,
            "expected 3 channels on axis {}, got shape {:?}",
            axis.index(),
            image.shape()
        );

        let brightness = image.mean().unwrap_or(0.0) / 255.0;
        let target = brightness * (NUM_CLASSES - 1) as f32;
        let scores = Array1::from_shape_fn(NUM_CLASSES, |class| -(class as f32 - target).powi(2));

        Ok(ModelOutput::Scores(scores.into_dyn()))
    }
}
