//! numpy-style element type descriptors.
//!
//! A descriptor such as `"<f4"` or `"|u1"` names the byte order, the kind of
//! element and its width in bytes. The string is kept verbatim so that a
//! decoded array re-encodes with the exact descriptor it arrived with.

use std::fmt;
use std::str::FromStr;

use crate::error::CodecError;

/// Byte order of multi-byte elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
    /// `|`: single-byte or raw elements where order is meaningless.
    NotApplicable,
}

impl ByteOrder {
    /// Byte order of the platform this process runs on.
    pub const fn native() -> Self {
        if cfg!(target_endian = "big") {
            Self::Big
        } else {
            Self::Little
        }
    }

    const fn prefix(self) -> char {
        match self {
            Self::Little => '<',
            Self::Big => '>',
            Self::NotApplicable => '|',
        }
    }
}

/// Element category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Bool,
    Signed,
    Unsigned,
    Float,
    Complex,
    /// Fixed-width raw bytes (`S` and `V` descriptors).
    Bytes,
}

impl Kind {
    const fn code(self) -> char {
        match self {
            Self::Bool => 'b',
            Self::Signed => 'i',
            Self::Unsigned => 'u',
            Self::Float => 'f',
            Self::Complex => 'c',
            Self::Bytes => 'V',
        }
    }

    fn accepts_size(self, size: usize) -> bool {
        match self {
            Self::Bool => size == 1,
            Self::Signed | Self::Unsigned => matches!(size, 1 | 2 | 4 | 8),
            Self::Float => matches!(size, 2 | 4 | 8),
            Self::Complex => matches!(size, 8 | 16),
            Self::Bytes => size > 0,
        }
    }
}

/// Parsed element type descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DType {
    descr: String,
    order: ByteOrder,
    kind: Kind,
    item_size: usize,
}

impl DType {
    /// Descriptor for `T` in the platform's native byte order.
    pub fn native<T: Element>() -> Self {
        let order = if T::SIZE == 1 {
            ByteOrder::NotApplicable
        } else {
            ByteOrder::native()
        };
        Self {
            descr: format!("{}{}{}", order.prefix(), T::KIND.code(), T::SIZE),
            order,
            kind: T::KIND,
            item_size: T::SIZE,
        }
    }

    /// The descriptor exactly as it was given.
    pub fn descr(&self) -> &str {
        &self.descr
    }

    pub const fn order(&self) -> ByteOrder {
        self.order
    }

    pub const fn kind(&self) -> Kind {
        self.kind
    }

    /// Width of one element in bytes.
    pub const fn item_size(&self) -> usize {
        self.item_size
    }

    /// True when elements of this type can be read as `T`.
    pub fn matches<T: Element>(&self) -> bool {
        self.kind == T::KIND && self.item_size == T::SIZE
    }

    /// Unsigned 8-bit, the only pixel type the server accepts.
    pub fn is_u8(&self) -> bool {
        self.matches::<u8>()
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.descr)
    }
}

/// Long numpy names mapped to their kind and width.
fn alias(name: &str) -> Option<(Kind, usize)> {
    let parsed = match name {
        "bool" => (Kind::Bool, 1),
        "int8" => (Kind::Signed, 1),
        "uint8" => (Kind::Unsigned, 1),
        "int16" => (Kind::Signed, 2),
        "uint16" => (Kind::Unsigned, 2),
        "int32" => (Kind::Signed, 4),
        "uint32" => (Kind::Unsigned, 4),
        "int64" => (Kind::Signed, 8),
        "uint64" => (Kind::Unsigned, 8),
        "float16" => (Kind::Float, 2),
        "float32" => (Kind::Float, 4),
        "float64" => (Kind::Float, 8),
        "complex64" => (Kind::Complex, 8),
        "complex128" => (Kind::Complex, 16),
        _ => return None,
    };
    Some(parsed)
}

impl FromStr for DType {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unsupported = || CodecError::UnsupportedDType(s.to_string());

        if let Some((kind, item_size)) = alias(s) {
            let order = if item_size == 1 {
                ByteOrder::NotApplicable
            } else {
                ByteOrder::native()
            };
            return Ok(Self {
                descr: s.to_string(),
                order,
                kind,
                item_size,
            });
        }

        let mut chars = s.chars().peekable();
        let order = match chars.peek() {
            Some('<') => ByteOrder::Little,
            Some('>') => ByteOrder::Big,
            Some('|') => ByteOrder::NotApplicable,
            // '=' or no prefix at all
            _ => ByteOrder::native(),
        };
        if matches!(chars.peek(), Some('<' | '>' | '|' | '=')) {
            chars.next();
        }

        let kind = match chars.next() {
            Some('b') => Kind::Bool,
            Some('i') => Kind::Signed,
            Some('u') => Kind::Unsigned,
            Some('f') => Kind::Float,
            Some('c') => Kind::Complex,
            Some('S' | 'V') => Kind::Bytes,
            _ => return Err(unsupported()),
        };

        let digits: String = chars.collect();
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(unsupported());
        }
        let item_size: usize = digits.parse().map_err(|_| unsupported())?;
        if !kind.accepts_size(item_size) {
            return Err(unsupported());
        }

        let order = if item_size == 1 && order != ByteOrder::NotApplicable {
            // numpy treats '<u1' and '|u1' alike.
            ByteOrder::NotApplicable
        } else {
            order
        };

        Ok(Self {
            descr: s.to_string(),
            order,
            kind,
            item_size,
        })
    }
}

/// Numeric element that can be read from and written to raw array bytes.
pub trait Element: Copy + 'static {
    const KIND: Kind;
    const SIZE: usize;

    /// Reads one element; `bytes` is exactly `SIZE` long.
    fn read(bytes: &[u8], order: ByteOrder) -> Self;

    /// Appends the element in native byte order.
    fn write_native(self, out: &mut Vec<u8>);
}

macro_rules! impl_element {
    ($($ty:ty => $kind:expr),* $(,)?) => {
        $(
            impl Element for $ty {
                const KIND: Kind = $kind;
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn read(bytes: &[u8], order: ByteOrder) -> Self {
                    let mut buf = [0u8; std::mem::size_of::<$ty>()];
                    buf.copy_from_slice(bytes);
                    match order {
                        ByteOrder::Little => <$ty>::from_le_bytes(buf),
                        ByteOrder::Big => <$ty>::from_be_bytes(buf),
                        ByteOrder::NotApplicable => <$ty>::from_ne_bytes(buf),
                    }
                }

                fn write_native(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_ne_bytes());
                }
            }
        )*
    };
}

impl_element! {
    u8 => Kind::Unsigned,
    i8 => Kind::Signed,
    u16 => Kind::Unsigned,
    i16 => Kind::Signed,
    u32 => Kind::Unsigned,
    i32 => Kind::Signed,
    u64 => Kind::Unsigned,
    i64 => Kind::Signed,
    f32 => Kind::Float,
    f64 => Kind::Float,
}
