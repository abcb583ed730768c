//! The contract a served model has to satisfy.

use ndarray::{Array3, ArrayD};

use crate::error::ServerError;

/// Number of classes a score vector must cover
pub const NUM_CLASSES: usize = 200;

/// The only input bounds the server accepts
pub const DEFAULT_BOUNDS: (f64, f64) = (0.0, 255.0);

/// Raw result of a model call, before normalization
#[derive(Debug, Clone, PartialEq)]
pub enum ModelOutput {
    /// A class index (or anything convertible to one by truncation)
    Scalar(f64),
    /// Per-class scores; the arg-max becomes the prediction
    Scores(ArrayD<f32>),
}

impl ModelOutput {
    pub fn label(class: i64) -> Self {
        Self::Scalar(class as f64)
    }
}

/// Image classifier served over HTTP.
///
/// Implementations must be safe to call from several requests at once.
pub trait Model: Send + Sync + 'static {
    /// Position of the color channel in the input: 1 (channels first, the
    /// image arrives as `[3, 64, 64]`) or 3 (channels last, `[64, 64, 3]`).
    fn channel_axis(&self) -> usize;

    /// Pixel value range the model expects; `None` means [`DEFAULT_BOUNDS`].
    fn bounds(&self) -> Option<(f64, f64)> {
        None
    }

    /// Classifies one float32 image.
    fn predictions(&self, image: Array3<f32>) -> anyhow::Result<ModelOutput>;
}

/// Where the color channel sits in the array handed to the model
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelLayout {
    First,
    Last,
}

impl ChannelLayout {
    pub fn from_axis(axis: usize) -> Result<Self, ServerError> {
        match axis {
            1 => Ok(Self::First),
            3 => Ok(Self::Last),
            other => Err(ServerError::Configuration(format!(
                "channel axis must be 1 or 3, got {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_axis() {
        assert_eq!(ChannelLayout::from_axis(1).unwrap(), ChannelLayout::First);
        assert_eq!(ChannelLayout::from_axis(3).unwrap(), ChannelLayout::Last);
        assert!(matches!(
            ChannelLayout::from_axis(2),
            Err(ServerError::Configuration(_))
        ));
        assert!(ChannelLayout::from_axis(0).is_err());
    }
}
