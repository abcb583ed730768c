//! Prediction dispatch: binds a request, validates the image, runs the model
//! and normalizes its answer into a BSON response.

use std::sync::Arc;
use std::time::Instant;

use array_codec::{DType, Entry, Envelope, NumericArray};
use image::DynamicImage;
use ndarray::{Array3, Ix3};
use tracing::info;

use crate::binder::{self, Argument, ParamKind, ParameterSchema, RawRequest};
use crate::error::ServerError;
use crate::model::{ChannelLayout, Model, ModelOutput, DEFAULT_BOUNDS, NUM_CLASSES};

/// Shape every input image must have (height, width, channels)
pub const IMAGE_SHAPE: [usize; 3] = [64, 64, 3];

/// Name of the image parameter
pub const IMAGE_PARAM: &str = "image";

/// Names of the fields in the response document
pub const OUTPUT_NAMES: &[&str] = &["prediction"];

/// Half-open range `[low, high)` a prediction must fall into
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Bounds {
    pub low: i64,
    pub high: i64,
}

impl Bounds {
    pub const fn contains(&self, value: i64) -> bool {
        self.low <= value && value < self.high
    }
}

/// Validated model plus everything needed to serve it
pub struct Predictor {
    model: Arc<dyn Model>,
    layout: ChannelLayout,
    bounds: Bounds,
    schema: ParameterSchema,
}

impl std::fmt::Debug for Predictor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Predictor")
            .field("layout", &self.layout)
            .field("bounds", &self.bounds)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

impl Predictor {
    /// Checks the model's declared layout and bounds.
    ///
    /// Anything but a channel axis of 1 or 3, or bounds other than
    /// [`DEFAULT_BOUNDS`], is a configuration error.
    pub fn new(model: Arc<dyn Model>) -> Result<Self, ServerError> {
        let layout = ChannelLayout::from_axis(model.channel_axis())?;

        let bounds = model.bounds().unwrap_or_else(|| {
            info!(bounds = ?DEFAULT_BOUNDS, "Model has no bounds, assuming defaults");
            DEFAULT_BOUNDS
        });
        if bounds != DEFAULT_BOUNDS {
            return Err(ServerError::Configuration(format!(
                "bounds must be {DEFAULT_BOUNDS:?}, got {bounds:?}; update the model \
                 or rescale its inputs"
            )));
        }

        info!(?layout, "Model accepted");

        Ok(Self {
            model,
            layout,
            bounds: Bounds { low: 0, high: 255 },
            schema: ParameterSchema::new().required(IMAGE_PARAM, ParamKind::Image),
        })
    }

    pub const fn layout(&self) -> ChannelLayout {
        self.layout
    }

    pub const fn bounds(&self) -> Bounds {
        self.bounds
    }

    /// Serves one prediction request and returns the serialized response.
    pub async fn invoke(&self, request: RawRequest) -> Result<Vec<u8>, ServerError> {
        let started = Instant::now();
        let result = self.run(request).await;
        let elapsed = started.elapsed();

        info!(elapsed_s = elapsed.as_secs_f64(), ok = result.is_ok(), "prediction took");
        crate::metrics::record_prediction(elapsed, result.is_ok());

        result
    }

    async fn run(&self, request: RawRequest) -> Result<Vec<u8>, ServerError> {
        let mut args = binder::bind(&self.schema, request)?;
        self.schema.check_required(&args)?;

        let image = args
            .take(IMAGE_PARAM)
            .ok_or_else(|| ServerError::Binding(IMAGE_PARAM.to_string()))?;
        let prediction = self.predict(image).await?;

        let envelope = Envelope::from_outputs(OUTPUT_NAMES, vec![Entry::int(prediction)])
            .map_err(|e| ServerError::ModelContract(e.to_string()))?;
        envelope
            .to_bytes()
            .map_err(|e| ServerError::Internal(format!("failed to encode response: {e}")))
    }

    /// Validates one image argument, runs the model and returns the class.
    pub async fn predict(&self, image: Argument) -> Result<i64, ServerError> {
        let pixels = image_pixels(image)?;

        // models expect float32 input
        let mut input = pixels.mapv(f32::from);
        if self.layout == ChannelLayout::First {
            let permuted = input.permuted_axes([2, 0, 1]);
            input = permuted.as_standard_layout().into_owned();
        }

        let model = Arc::clone(&self.model);
        let output = tokio::task::spawn_blocking(move || model.predictions(input))
            .await
            .map_err(|e| ServerError::Internal(format!("model task failed: {e}")))?
            .map_err(|e| ServerError::Model(format!("{e:#}")))?;

        normalize(output, self.bounds)
    }
}

/// Turns an image argument into a validated `64x64x3` pixel array.
fn image_pixels(image: Argument) -> Result<Array3<u8>, ServerError> {
    let array = match image {
        Argument::Value(Entry::Array(array)) => array,
        Argument::Image(decoded) => rgb_array(decoded)?,
        Argument::Value(other) => {
            return Err(ServerError::Validation(format!(
                "image must be an array, got {}",
                other.kind()
            )))
        }
    };

    if array.shape() != IMAGE_SHAPE {
        return Err(ServerError::Validation(format!(
            "image must have shape {IMAGE_SHAPE:?}, got {:?}",
            array.shape()
        )));
    }
    if !array.dtype().is_u8() {
        return Err(ServerError::Validation(format!(
            "image must have dtype uint8, got {}",
            array.dtype()
        )));
    }

    array
        .to_ndarray::<u8>()?
        .into_dimensionality::<Ix3>()
        .map_err(|e| ServerError::Validation(e.to_string()))
}

fn rgb_array(image: DynamicImage) -> Result<NumericArray, ServerError> {
    let buffer = match image {
        DynamicImage::ImageRgb8(buffer) => buffer,
        other => {
            return Err(ServerError::Validation(format!(
                "image must be 8-bit RGB, got {:?}",
                other.color()
            )))
        }
    };
    let shape = vec![buffer.height() as usize, buffer.width() as usize, 3];
    Ok(NumericArray::new(shape, DType::native::<u8>(), buffer.into_raw())?)
}

/// Reduces a model output to a single class index inside `bounds`.
pub fn normalize(output: ModelOutput, bounds: Bounds) -> Result<i64, ServerError> {
    let prediction = match output {
        ModelOutput::Scores(scores) if scores.len() > 1 => {
            if scores.len() != NUM_CLASSES {
                return Err(ServerError::ModelContract(format!(
                    "expected {NUM_CLASSES} class scores, got {}",
                    scores.len()
                )));
            }
            i64::try_from(argmax(scores.iter().copied())).unwrap_or(i64::MAX)
        }
        ModelOutput::Scores(scores) => {
            let value = scores.iter().next().copied().ok_or_else(|| {
                ServerError::ModelContract("model returned an empty prediction".to_string())
            })?;
            truncate(f64::from(value))?
        }
        ModelOutput::Scalar(value) => truncate(value)?,
    };

    if !bounds.contains(prediction) {
        return Err(ServerError::ModelContract(format!(
            "prediction {prediction} is outside [{}, {})",
            bounds.low, bounds.high
        )));
    }
    Ok(prediction)
}

fn truncate(value: f64) -> Result<i64, ServerError> {
    if !value.is_finite() {
        return Err(ServerError::ModelContract(format!(
            "prediction {value} is not a finite number"
        )));
    }
    // saturating; out-of-range values are caught by the bounds check
    Ok(value.trunc() as i64)
}

/// Index of the first maximum; a NaN counts as the maximum.
fn argmax(values: impl Iterator<Item = f32>) -> usize {
    let mut best_index = 0;
    let mut best = f32::NEG_INFINITY;
    for (index, value) in values.enumerate() {
        if value.is_nan() {
            return index;
        }
        if index == 0 || value > best {
            best = value;
            best_index = index;
        }
    }
    best_index
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, ArrayD, IxDyn};
    use std::sync::Mutex;

    const FULL: Bounds = Bounds { low: 0, high: 255 };

    /// Records the input it was given and answers with a fixed output.
    struct FixedModel {
        axis: usize,
        bounds: Option<(f64, f64)>,
        output: ModelOutput,
        seen_shape: Mutex<Option<Vec<usize>>>,
    }

    impl FixedModel {
        fn new(axis: usize, output: ModelOutput) -> Self {
            Self {
                axis,
                bounds: None,
                output,
                seen_shape: Mutex::new(None),
            }
        }
    }

    impl Model for FixedModel {
        fn channel_axis(&self) -> usize {
            self.axis
        }

        fn bounds(&self) -> Option<(f64, f64)> {
            self.bounds
        }

        fn predictions(&self, image: Array3<f32>) -> anyhow::Result<ModelOutput> {
            *self.seen_shape.lock().unwrap() = Some(image.shape().to_vec());
            Ok(self.output.clone())
        }
    }

    fn scores_with_max_at(index: usize) -> ModelOutput {
        let mut scores = Array1::<f32>::zeros(NUM_CLASSES);
        scores[index] = 1.0;
        ModelOutput::Scores(scores.into_dyn())
    }

    fn u8_image(shape: &[usize]) -> Argument {
        let pixels = ArrayD::<u8>::zeros(IxDyn(shape));
        Argument::Value(Entry::Array(NumericArray::from_ndarray(&pixels)))
    }

    #[test]
    fn test_vector_output_uses_argmax() {
        assert_eq!(normalize(scores_with_max_at(57), FULL).unwrap(), 57);
    }

    #[test]
    fn test_scalar_output_passes_through() {
        assert_eq!(normalize(ModelOutput::label(42), FULL).unwrap(), 42);
        assert_eq!(normalize(ModelOutput::Scalar(42.9), FULL).unwrap(), 42);
    }

    #[test]
    fn test_single_element_vector_is_a_scalar() {
        let output = ModelOutput::Scores(Array1::from(vec![12.0f32]).into_dyn());
        assert_eq!(normalize(output, FULL).unwrap(), 12);
    }

    #[test]
    fn test_wrong_class_count_is_rejected() {
        let output = ModelOutput::Scores(Array1::<f32>::zeros(10).into_dyn());
        assert!(matches!(
            normalize(output, FULL),
            Err(ServerError::ModelContract(_))
        ));
    }

    #[test]
    fn test_out_of_bounds_prediction_is_rejected() {
        assert!(normalize(ModelOutput::label(255), FULL).is_err());
        assert!(normalize(ModelOutput::label(-1), FULL).is_err());
        assert!(normalize(ModelOutput::Scalar(f64::NAN), FULL).is_err());
        assert!(normalize(ModelOutput::Scores(ArrayD::zeros(IxDyn(&[0]))), FULL).is_err());
    }

    #[test]
    fn test_argmax_ties_and_nan() {
        assert_eq!(argmax([1.0, 3.0, 3.0, 2.0].into_iter()), 1);
        assert_eq!(argmax([f32::NEG_INFINITY, f32::NEG_INFINITY].into_iter()), 0);
        assert_eq!(argmax([1.0, f32::NAN, 5.0].into_iter()), 1);
    }

    #[test]
    fn test_rejects_bad_channel_axis() {
        let model = Arc::new(FixedModel::new(2, ModelOutput::label(0)));
        assert!(matches!(
            Predictor::new(model),
            Err(ServerError::Configuration(_))
        ));
    }

    #[test]
    fn test_rejects_non_default_bounds() {
        let mut model = FixedModel::new(3, ModelOutput::label(0));
        model.bounds = Some((0.0, 1.0));
        assert!(matches!(
            Predictor::new(Arc::new(model)),
            Err(ServerError::Configuration(_))
        ));

        let mut model = FixedModel::new(3, ModelOutput::label(0));
        model.bounds = Some(DEFAULT_BOUNDS);
        let predictor = Predictor::new(Arc::new(model)).unwrap();
        assert_eq!(predictor.bounds(), FULL);
        assert_eq!(predictor.layout(), ChannelLayout::Last);
    }

    #[tokio::test]
    async fn test_channels_last_input_shape() {
        let model = Arc::new(FixedModel::new(3, ModelOutput::label(7)));
        let predictor = Predictor::new(model.clone()).unwrap();

        assert_eq!(predictor.predict(u8_image(&[64, 64, 3])).await.unwrap(), 7);
        assert_eq!(
            model.seen_shape.lock().unwrap().as_deref(),
            Some(&[64, 64, 3][..])
        );
    }

    #[tokio::test]
    async fn test_channels_first_input_is_transposed() {
        let model = Arc::new(FixedModel::new(1, scores_with_max_at(3)));
        let predictor = Predictor::new(model.clone()).unwrap();
        assert_eq!(predictor.layout(), ChannelLayout::First);

        assert_eq!(predictor.predict(u8_image(&[64, 64, 3])).await.unwrap(), 3);
        assert_eq!(
            model.seen_shape.lock().unwrap().as_deref(),
            Some(&[3, 64, 64][..])
        );
    }

    #[tokio::test]
    async fn test_transpose_moves_pixels() {
        struct Probe;
        impl Model for Probe {
            fn channel_axis(&self) -> usize {
                1
            }
            fn predictions(&self, image: Array3<f32>) -> anyhow::Result<ModelOutput> {
                // pixel (y=1, x=2, c=0) was set to 9 before the transpose
                Ok(ModelOutput::Scalar(f64::from(image[[0, 1, 2]])))
            }
        }

        let mut pixels = Array3::<u8>::zeros((64, 64, 3));
        pixels[[1, 2, 0]] = 9;
        let image = Argument::Value(Entry::Array(NumericArray::from_ndarray(&pixels)));

        let predictor = Predictor::new(Arc::new(Probe)).unwrap();
        assert_eq!(predictor.predict(image).await.unwrap(), 9);
    }

    #[tokio::test]
    async fn test_wrong_shape_is_a_validation_error() {
        let predictor = Predictor::new(Arc::new(FixedModel::new(3, ModelOutput::label(1)))).unwrap();
        assert!(matches!(
            predictor.predict(u8_image(&[32, 32, 3])).await,
            Err(ServerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_wrong_dtype_is_a_validation_error() {
        let predictor = Predictor::new(Arc::new(FixedModel::new(3, ModelOutput::label(1)))).unwrap();
        let floats = ArrayD::<f32>::zeros(IxDyn(&IMAGE_SHAPE));
        let image = Argument::Value(Entry::Array(NumericArray::from_ndarray(&floats)));
        assert!(matches!(
            predictor.predict(image).await,
            Err(ServerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_non_array_image_is_a_validation_error() {
        let predictor = Predictor::new(Arc::new(FixedModel::new(3, ModelOutput::label(1)))).unwrap();
        let image = Argument::Value(Entry::text("a cat"));
        assert!(matches!(
            predictor.predict(image).await,
            Err(ServerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_decoded_rgb_image_is_accepted() {
        let predictor = Predictor::new(Arc::new(FixedModel::new(3, ModelOutput::label(4)))).unwrap();
        let decoded = DynamicImage::ImageRgb8(image::RgbImage::new(64, 64));
        assert_eq!(predictor.predict(Argument::Image(decoded)).await.unwrap(), 4);

        let gray = DynamicImage::ImageLuma8(image::GrayImage::new(64, 64));
        assert!(matches!(
            predictor.predict(Argument::Image(gray)).await,
            Err(ServerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_model_failure_surfaces() {
        struct Failing;
        impl Model for Failing {
            fn channel_axis(&self) -> usize {
                3
            }
            fn predictions(&self, _image: Array3<f32>) -> anyhow::Result<ModelOutput> {
                anyhow::bail!("weights not loaded")
            }
        }

        let predictor = Predictor::new(Arc::new(Failing)).unwrap();
        let err = predictor.predict(u8_image(&IMAGE_SHAPE)).await.unwrap_err();
        assert!(matches!(err, ServerError::Model(ref msg) if msg.contains("weights not loaded")));
    }

    #[tokio::test]
    async fn test_invoke_returns_prediction_document() {
        let predictor = Predictor::new(Arc::new(FixedModel::new(3, scores_with_max_at(57)))).unwrap();

        let mut body = Envelope::new();
        if let Argument::Value(entry) = u8_image(&IMAGE_SHAPE) {
            body.insert(IMAGE_PARAM, entry);
        }
        let response = predictor
            .invoke(RawRequest::bson(body.to_bytes().unwrap()))
            .await
            .unwrap();

        let decoded = Envelope::from_bytes(&response).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded.get("prediction").and_then(Entry::as_i64), Some(57));
    }

    #[tokio::test]
    async fn test_invoke_without_image_is_a_binding_error() {
        let predictor = Predictor::new(Arc::new(FixedModel::new(3, ModelOutput::label(0)))).unwrap();
        let body = Envelope::from_outputs(&["unrelated"], vec![Entry::int(1)]).unwrap();
        let err = predictor
            .invoke(RawRequest::bson(body.to_bytes().unwrap()))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Binding(ref name) if name == "image"));
    }
}
