//! BSON envelopes carrying named fields and tagged array sub-documents.
//!
//! An array travels as
//!
//! ```text
//! { "type": "array", "shape": [64, 64, 3], "dtype": "|u1", "data": <binary> }
//! ```
//!
//! Bytes are copied as-is; the dtype descriptor tells the reader how to
//! interpret them.

use bson::spec::BinarySubtype;
use bson::{Binary, Bson, Document};

use crate::array::NumericArray;
use crate::dtype::DType;
use crate::error::CodecError;

/// Media type identifying a BSON body.
pub const BSON_MEDIA_TYPE: &str = "application/bson";

/// Value of the `type` field that marks an array descriptor.
pub const ARRAY_TAG: &str = "array";

/// One field of an envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    /// Any BSON value that is neither an array descriptor nor binary data.
    Scalar(Bson),
    Array(NumericArray),
    Bytes(Vec<u8>),
}

impl Entry {
    /// Integer scalar, written as int32 when it fits.
    pub fn int(value: i64) -> Self {
        match i32::try_from(value) {
            Ok(small) => Self::Scalar(Bson::Int32(small)),
            Err(_) => Self::Scalar(Bson::Int64(value)),
        }
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self::Scalar(Bson::String(value.into()))
    }

    pub fn as_array(&self) -> Option<&NumericArray> {
        match self {
            Self::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Scalar(Bson::Int32(v)) => Some(i64::from(*v)),
            Self::Scalar(Bson::Int64(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Scalar(Bson::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Short name of the variant, for logs and error messages.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "scalar",
            Self::Array(_) => "array",
            Self::Bytes(_) => "bytes",
        }
    }
}

impl From<NumericArray> for Entry {
    fn from(array: NumericArray) -> Self {
        Self::Array(array)
    }
}

/// Encodes an array as a tagged descriptor document.
pub fn encode(array: &NumericArray) -> Bson {
    let shape = array
        .shape()
        .iter()
        .map(|&dim| match i32::try_from(dim) {
            Ok(small) => Bson::Int32(small),
            Err(_) => Bson::Int64(i64::try_from(dim).unwrap_or(i64::MAX)),
        })
        .collect();

    let mut doc = Document::new();
    doc.insert("type", ARRAY_TAG);
    doc.insert("shape", Bson::Array(shape));
    doc.insert("dtype", array.dtype().descr());
    doc.insert(
        "data",
        Binary {
            subtype: BinarySubtype::Generic,
            bytes: array.data().to_vec(),
        },
    );
    Bson::Document(doc)
}

/// Encodes any entry into its wire value.
pub fn encode_entry(entry: &Entry) -> Bson {
    match entry {
        Entry::Scalar(value) => value.clone(),
        Entry::Array(array) => encode(array),
        Entry::Bytes(bytes) => Bson::Binary(Binary {
            subtype: BinarySubtype::Generic,
            bytes: bytes.clone(),
        }),
    }
}

/// Decodes a wire value; values that are not array descriptors pass through.
pub fn decode(value: Bson) -> Result<Entry, CodecError> {
    match value {
        Bson::Document(doc) if is_array_descriptor(&doc) => decode_array(doc).map(Entry::Array),
        Bson::Binary(binary) => Ok(Entry::Bytes(binary.bytes)),
        other => Ok(Entry::Scalar(other)),
    }
}

fn is_array_descriptor(doc: &Document) -> bool {
    matches!(doc.get("type"), Some(Bson::String(tag)) if tag == ARRAY_TAG)
}

fn decode_array(mut doc: Document) -> Result<NumericArray, CodecError> {
    let shape = match doc.get("shape").ok_or(CodecError::MissingField("shape"))? {
        Bson::Array(dims) => dims
            .iter()
            .map(decode_dimension)
            .collect::<Result<Vec<_>, _>>()?,
        other => {
            return Err(CodecError::InvalidField {
                field: "shape",
                reason: format!("expected an array of integers, got {:?}", other.element_type()),
            })
        }
    };

    let dtype: DType = match doc.get("dtype").ok_or(CodecError::MissingField("dtype"))? {
        Bson::String(descr) => descr.parse()?,
        other => {
            return Err(CodecError::InvalidField {
                field: "dtype",
                reason: format!("expected a string, got {:?}", other.element_type()),
            })
        }
    };

    let data = match doc.remove("data").ok_or(CodecError::MissingField("data"))? {
        Bson::Binary(binary) => binary.bytes,
        other => {
            return Err(CodecError::InvalidField {
                field: "data",
                reason: format!("expected binary data, got {:?}", other.element_type()),
            })
        }
    };

    NumericArray::new(shape, dtype, data)
}

fn decode_dimension(value: &Bson) -> Result<usize, CodecError> {
    let dim = match value {
        Bson::Int32(v) => i64::from(*v),
        Bson::Int64(v) => *v,
        other => {
            return Err(CodecError::InvalidField {
                field: "shape",
                reason: format!("dimension {other} is not an integer"),
            })
        }
    };
    usize::try_from(dim).map_err(|_| CodecError::InvalidField {
        field: "shape",
        reason: format!("dimension {dim} is negative"),
    })
}

/// Ordered set of named entries, the body of every request and response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope {
    fields: Vec<(String, Entry)>,
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names results positionally.
    ///
    /// A single name wraps the single value. With several names the counts
    /// must agree.
    pub fn from_outputs(names: &[&str], values: Vec<Entry>) -> Result<Self, CodecError> {
        if names.len() != values.len() {
            return Err(CodecError::OutputArity {
                expected: names.len(),
                actual: values.len(),
            });
        }
        let mut envelope = Self::new();
        for (name, value) in names.iter().zip(values) {
            envelope.insert(*name, value);
        }
        Ok(envelope)
    }

    /// Inserts or replaces a field, keeping its original position on replace.
    pub fn insert(&mut self, name: impl Into<String>, entry: Entry) {
        let name = name.into();
        match self.fields.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = entry,
            None => self.fields.push((name, entry)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Entry> {
        self.fields
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, entry)| entry)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Entry)> {
        self.fields.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    /// Decodes every field of a parsed document.
    pub fn from_document(doc: Document) -> Result<Self, CodecError> {
        let fields = doc
            .into_iter()
            .map(|(name, value)| decode(value).map(|entry| (name, entry)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { fields })
    }

    pub fn to_document(&self) -> Document {
        self.fields
            .iter()
            .map(|(name, entry)| (name.clone(), encode_entry(entry)))
            .collect()
    }

    /// Parses a serialized BSON document and decodes its fields.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let doc = Document::from_reader(bytes)?;
        Self::from_document(doc)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::new();
        self.to_document().to_writer(&mut buf)?;
        Ok(buf)
    }
}

impl IntoIterator for Envelope {
    type Item = (String, Entry);
    type IntoIter = std::vec::IntoIter<(String, Entry)>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}
