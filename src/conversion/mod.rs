//! Type encoding and decoding for PostgreSQL wire protocol.
//!
//! This module provides traits and implementations for converting between
//! Rust types and PostgreSQL wire format values. Parameters are always sent
//! in binary format; results may arrive in either format.

pub mod array;
mod bytes;
mod primitives;
mod string;

pub use array::{decode_array, decode_array_of, encode_array, encode_array_payload};

use crate::error::{Error, Result};
use crate::protocol::types::Oid;
use crate::value::Value;

/// Trait for decoding PostgreSQL values into Rust types.
///
/// The OID parameter allows implementations to check the PostgreSQL type
/// and reject incompatible types with clear error messages.
pub trait FromWireValue<'a>: Sized {
    /// Decode from NULL value.
    ///
    /// Default implementation returns an error. Override for types that can
    /// represent NULL (like `Option<T>`).
    fn from_null() -> Result<Self> {
        Err(Error::Decode("unexpected NULL value".into()))
    }

    /// Decode from text format bytes.
    fn from_text(oid: Oid, bytes: &'a [u8]) -> Result<Self>;

    /// Decode from binary format bytes.
    ///
    /// Binary format uses PostgreSQL's internal representation. Integers are
    /// big-endian, floats are IEEE 754, etc.
    fn from_binary(oid: Oid, bytes: &'a [u8]) -> Result<Self>;
}

/// Trait for encoding Rust values as binary PostgreSQL values.
pub trait ToWireValue {
    /// The type OID this value encodes to.
    ///
    /// Array types derive theirs from the element type, so this is known at
    /// compile time.
    const OID: Oid;

    /// Append the binary payload (without length prefix).
    ///
    /// Never called for values where [`is_null`](Self::is_null) is true.
    fn encode(&self, buf: &mut Vec<u8>) -> Result<()>;

    /// Returns true if this value is SQL NULL.
    fn is_null(&self) -> bool {
        false
    }

    /// Encode into a typed [`Value`].
    fn to_value(&self) -> Result<Value> {
        if self.is_null() {
            return Ok(Value::null(Self::OID));
        }
        let mut raw = Vec::new();
        self.encode(&mut raw)?;
        Ok(Value::binary(Self::OID, raw))
    }
}

/// Trait for encoding the full parameter list of a query.
pub trait ToParams {
    /// Encode every parameter into a typed [`Value`].
    fn to_values(&self) -> Result<Vec<Value>>;
}

// === Option<T> - NULL handling ===

impl<'a, T: FromWireValue<'a>> FromWireValue<'a> for Option<T> {
    fn from_null() -> Result<Self> {
        Ok(None)
    }

    fn from_text(oid: Oid, bytes: &'a [u8]) -> Result<Self> {
        T::from_text(oid, bytes).map(Some)
    }

    fn from_binary(oid: Oid, bytes: &'a [u8]) -> Result<Self> {
        T::from_binary(oid, bytes).map(Some)
    }
}

impl<T: ToWireValue> ToWireValue for Option<T> {
    const OID: Oid = T::OID;

    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        match self {
            Some(v) => v.encode(buf),
            None => Ok(()),
        }
    }

    fn is_null(&self) -> bool {
        self.as_ref().is_none_or(|v| v.is_null())
    }
}

// === Reference support ===

impl<T: ToWireValue + ?Sized> ToWireValue for &T {
    const OID: Oid = T::OID;

    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        (*self).encode(buf)
    }

    fn is_null(&self) -> bool {
        (*self).is_null()
    }
}

// === ToParams implementations ===

impl ToParams for () {
    fn to_values(&self) -> Result<Vec<Value>> {
        Ok(Vec::new())
    }
}

impl ToParams for [Value] {
    fn to_values(&self) -> Result<Vec<Value>> {
        Ok(self.to_vec())
    }
}

impl ToParams for Vec<Value> {
    fn to_values(&self) -> Result<Vec<Value>> {
        Ok(self.clone())
    }
}

impl<T: ToParams + ?Sized> ToParams for &T {
    fn to_values(&self) -> Result<Vec<Value>> {
        (*self).to_values()
    }
}

// Tuple implementations via macro
macro_rules! impl_to_params {
    ($($idx:tt: $T:ident),+) => {
        impl<$($T: ToWireValue),+> ToParams for ($($T,)+) {
            fn to_values(&self) -> Result<Vec<Value>> {
                Ok(vec![$(self.$idx.to_value()?),+])
            }
        }
    };
}

impl_to_params!(0: T0);
impl_to_params!(0: T0, 1: T1);
impl_to_params!(0: T0, 1: T1, 2: T2);
impl_to_params!(0: T0, 1: T1, 2: T2, 3: T3);
impl_to_params!(0: T0, 1: T1, 2: T2, 3: T3, 4: T4);
impl_to_params!(0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5);
impl_to_params!(0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6);
impl_to_params!(0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::oid;

    #[test]
    fn test_option_null() {
        assert_eq!(Option::<i32>::from_null().unwrap(), None);
        assert_eq!(None::<i32>.to_value().unwrap(), Value::null(oid::INT4));
    }

    #[test]
    fn tuple_params() {
        let values = (1_i32, "abc", None::<i64>).to_values().unwrap();
        assert_eq!(
            values,
            vec![
                Value::binary(oid::INT4, 1_i32.to_be_bytes()),
                Value::binary(oid::TEXT, b"abc".to_vec()),
                Value::null(oid::INT8),
            ]
        );
    }
}
