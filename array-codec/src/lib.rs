//! Array codec for the vision model server.
//!
//! Converts numeric arrays to and from tagged BSON sub-documents so that they
//! can travel inside a generic key-value body:
//! - [`dtype`]: numpy-style element descriptors (`"|u1"`, `"<f4"`, ...)
//! - [`array`]: byte-backed arrays whose length is checked against their shape
//! - [`envelope`]: the tagged union of field values and the BSON document
//!
//! # Example
//!
//! ```
//! use array_codec::{decode, encode, Entry, NumericArray};
//! use ndarray::Array3;
//!
//! let image = Array3::<u8>::zeros((64, 64, 3));
//! let array = NumericArray::from_ndarray(&image);
//! let entry = decode(encode(&array)).unwrap();
//! assert_eq!(entry, Entry::Array(array));
//! ```

pub mod array;
pub mod dtype;
pub mod envelope;
mod error;

pub use array::NumericArray;
pub use dtype::{ByteOrder, DType, Element, Kind};
pub use envelope::{decode, encode, encode_entry, Entry, Envelope, ARRAY_TAG, BSON_MEDIA_TYPE};
pub use error::CodecError;

// Re-exported so callers build scalars with the same BSON version.
pub use bson;
