//! Typed wire value.

use crate::conversion::FromWireValue;
use crate::error::Result;
use crate::protocol::types::{FormatCode, Oid};

/// A single value as it travels on the wire: a type tag plus the raw payload.
///
/// `raw == None` is SQL NULL. This is the unit bound as a query parameter and
/// produced by the array codec for each element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value {
    /// Type OID of the value
    pub type_oid: Oid,
    /// Type modifier, if known
    pub type_modifier: Option<i32>,
    /// Format the payload is encoded in
    pub format: FormatCode,
    /// Payload bytes, `None` for NULL
    pub raw: Option<Vec<u8>>,
}

impl Value {
    /// Create a value from its parts.
    pub fn new(type_oid: Oid, format: FormatCode, raw: Option<Vec<u8>>) -> Self {
        Self {
            type_oid,
            type_modifier: None,
            format,
            raw,
        }
    }

    /// Binary-format value.
    pub fn binary(type_oid: Oid, raw: impl Into<Vec<u8>>) -> Self {
        Self::new(type_oid, FormatCode::Binary, Some(raw.into()))
    }

    /// Binary-format NULL of the given type.
    pub fn null(type_oid: Oid) -> Self {
        Self::new(type_oid, FormatCode::Binary, None)
    }

    /// Set the type modifier.
    pub fn with_type_modifier(mut self, type_modifier: i32) -> Self {
        self.type_modifier = Some(type_modifier);
        self
    }

    /// Returns true for SQL NULL.
    pub fn is_null(&self) -> bool {
        self.raw.is_none()
    }

    /// Payload bytes, `None` for NULL.
    pub fn bytes(&self) -> Option<&[u8]> {
        self.raw.as_deref()
    }

    /// Decode into a Rust type.
    pub fn decode<'a, T: FromWireValue<'a>>(&'a self) -> Result<T> {
        match (&self.raw, self.format) {
            (None, _) => T::from_null(),
            (Some(raw), FormatCode::Text) => T::from_text(self.type_oid, raw),
            (Some(raw), FormatCode::Binary) => T::from_binary(self.type_oid, raw),
        }
    }
}
