//! Request argument binding.
//!
//! Collects named arguments from every part of a request and keeps the ones
//! the parameter schema declares. Sources are consulted in a fixed order and
//! the first value seen for a name wins:
//!
//! 1. fields of a BSON body (`application/bson`), arrays decoded
//! 2. query parameters
//! 3. form fields
//! 4. uploaded files, decoded to images for `Image` parameters
//!
//! Unknown names and later duplicates are dropped with a debug log, never an
//! error.

use array_codec::{Entry, Envelope, BSON_MEDIA_TYPE};
use bytes::Bytes;
use image::DynamicImage;
use tracing::{debug, info};

use crate::error::ServerError;

/// How a parameter's value is decoded before binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Bound as received
    Value,
    /// Uploaded file bytes are decoded into an image
    Image,
}

/// One declared parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub kind: ParamKind,
    /// Required parameters have no default; binding fails without them
    pub required: bool,
}

/// Ordered set of parameters a handler accepts
#[derive(Debug, Clone, Default)]
pub struct ParameterSchema {
    params: Vec<Parameter>,
}

impl ParameterSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(self, name: impl Into<String>, kind: ParamKind) -> Self {
        self.with(name.into(), kind, true)
    }

    pub fn optional(self, name: impl Into<String>, kind: ParamKind) -> Self {
        self.with(name.into(), kind, false)
    }

    fn with(mut self, name: String, kind: ParamKind, required: bool) -> Self {
        self.params.retain(|p| p.name != name);
        self.params.push(Parameter {
            name,
            kind,
            required,
        });
        self
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn accepts(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Fails on the first required parameter that was not bound.
    pub fn check_required(&self, args: &Arguments) -> Result<(), ServerError> {
        match self
            .params
            .iter()
            .find(|p| p.required && !args.contains(&p.name))
        {
            Some(missing) => Err(ServerError::Binding(missing.name.clone())),
            None => Ok(()),
        }
    }
}

/// An uploaded file part
#[derive(Debug, Clone)]
pub struct FilePart {
    pub name: String,
    pub file_name: Option<String>,
    pub data: Bytes,
}

/// Transport-neutral view of an incoming request
#[derive(Debug, Clone, Default)]
pub struct RawRequest {
    pub content_type: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub query: Vec<(String, String)>,
    pub form: Vec<(String, String)>,
    pub files: Vec<FilePart>,
}

impl RawRequest {
    /// A request whose body is a serialized BSON document.
    pub fn bson(body: impl Into<Bytes>) -> Self {
        Self {
            content_type: Some(BSON_MEDIA_TYPE.to_string()),
            body: body.into(),
            ..Default::default()
        }
    }

    /// Content type without parameters, lower-cased.
    pub fn media_type(&self) -> String {
        self.content_type
            .as_deref()
            .map(media_type_essence)
            .unwrap_or_default()
    }

    pub fn is_bson(&self) -> bool {
        self.media_type() == BSON_MEDIA_TYPE
    }

    /// True when the caller asked for a request dump with `?verbose=...`.
    pub fn verbose(&self) -> bool {
        self.query
            .iter()
            .any(|(name, value)| name == "verbose" && !value.is_empty())
    }

    fn log_summary(&self) {
        fn keys(pairs: &[(String, String)]) -> Vec<&str> {
            pairs.iter().map(|(k, _)| k.as_str()).collect()
        }
        info!(
            headers = ?self.headers,
            args = ?keys(&self.query),
            form = ?keys(&self.form),
            files = ?self
                .files
                .iter()
                .map(|f| (f.name.as_str(), f.file_name.as_deref()))
                .collect::<Vec<_>>(),
            is_bson = self.is_bson(),
            data_len = self.body.len(),
            "Request summary"
        );
    }
}

/// `"Application/BSON; charset=x"` -> `"application/bson"`
pub fn media_type_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// A bound argument value
#[derive(Debug, Clone)]
pub enum Argument {
    Value(Entry),
    Image(DynamicImage),
}

impl Argument {
    pub fn as_entry(&self) -> Option<&Entry> {
        match self {
            Self::Value(entry) => Some(entry),
            Self::Image(_) => None,
        }
    }
}

/// Arguments bound from one request, in binding order
#[derive(Debug, Default)]
pub struct Arguments {
    values: Vec<(String, Argument)>,
}

impl Arguments {
    pub fn contains(&self, name: &str) -> bool {
        self.values.iter().any(|(bound, _)| bound == name)
    }

    pub fn get(&self, name: &str) -> Option<&Argument> {
        self.values
            .iter()
            .find(|(bound, _)| bound == name)
            .map(|(_, value)| value)
    }

    /// Removes and returns an argument.
    pub fn take(&mut self, name: &str) -> Option<Argument> {
        let index = self.values.iter().position(|(bound, _)| bound == name)?;
        Some(self.values.remove(index).1)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(name, _)| name.as_str())
    }

    fn add(&mut self, schema: &ParameterSchema, name: String, value: Argument) {
        if self.contains(&name) {
            debug!(argument = %name, "Ignoring argument, already bound");
            return;
        }
        if !schema.accepts(&name) {
            debug!(argument = %name, "Ignoring argument, not accepted");
            return;
        }
        self.values.push((name, value));
    }
}

/// Binds the arguments of `request` against `schema`.
///
/// Fails only when the BSON body or an uploaded image cannot be decoded.
pub fn bind(schema: &ParameterSchema, request: RawRequest) -> Result<Arguments, ServerError> {
    if request.verbose() {
        request.log_summary();
    }

    let body = if request.is_bson() {
        Envelope::from_bytes(&request.body)?
    } else {
        Envelope::new()
    };

    let mut args = Arguments::default();

    for (name, entry) in body {
        args.add(schema, name, Argument::Value(entry));
    }

    for (name, value) in request.query {
        args.add(schema, name, Argument::Value(Entry::text(value)));
    }

    for (name, value) in request.form {
        args.add(schema, name, Argument::Value(Entry::text(value)));
    }

    for file in request.files {
        let Some(param) = schema.get(&file.name) else {
            continue;
        };
        if args.contains(&file.name) {
            debug!(argument = %file.name, "Ignoring file, already bound");
            continue;
        }
        debug!(
            argument = %file.name,
            file_name = file.file_name.as_deref().unwrap_or_default(),
            size = file.data.len(),
            "Binding uploaded file"
        );
        let value = match param.kind {
            ParamKind::Image => Argument::Image(image::load_from_memory(&file.data)?),
            ParamKind::Value => Argument::Value(Entry::Bytes(file.data.to_vec())),
        };
        args.add(schema, file.name, value);
    }

    Ok(args)
}
