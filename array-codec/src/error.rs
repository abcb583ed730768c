use thiserror::Error;

/// Errors raised while converting between arrays and BSON envelopes.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Malformed BSON document: {0}")]
    Document(#[from] bson::de::Error),

    #[error("Failed to serialize BSON document: {0}")]
    Serialize(#[from] bson::ser::Error),

    #[error("Array descriptor is missing field `{0}`")]
    MissingField(&'static str),

    #[error("Array descriptor field `{field}` is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Unsupported dtype `{0}`")]
    UnsupportedDType(String),

    #[error("Array data holds {actual} bytes but shape {shape:?} of `{dtype}` needs {expected}")]
    LengthMismatch {
        shape: Vec<usize>,
        dtype: String,
        expected: usize,
        actual: usize,
    },

    #[error("Cannot read `{actual}` elements as `{requested}`")]
    DTypeMismatch { requested: String, actual: String },

    #[error("Expected {expected} outputs but got {actual}")]
    OutputArity { expected: usize, actual: usize },
}
