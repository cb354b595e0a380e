//! Single-dimension binary array codec.
//!
//! Layout (all integers big-endian `u32`):
//!
//! ```text
//! is_not_empty | has_null | element_oid [| count | dimensions=1 | (len bytes | 0xFFFFFFFF)*]
//! ```
//!
//! `has_null` selects how elements are read back: with `0` the elements are
//! read as length-prefixed payloads until the buffer is exhausted, with `1`
//! exactly `count` elements are read and the NULL sentinel is honored.

use crate::error::{Error, Result};
use crate::protocol::codec::{len_u32, read_bytes, read_u32, write_u32};
use crate::protocol::types::{FormatCode, Oid, array_type_of, element_type_of, oid};
use crate::value::Value;

use super::{FromWireValue, ToWireValue};

/// Length sentinel marking a NULL element.
const NULL_LENGTH: u32 = u32::MAX;

/// Element types whose NULL entries can be decoded.
const NULLABLE_ELEMENT_TYPES: [Oid; 4] = [oid::TEXT, oid::INT2, oid::INT4, oid::INT8];

/// Encode array elements into the binary array payload.
///
/// `None` items and items without a payload are written as NULL. Fails with
/// [`Error::InvalidUsage`] if the element count or an element length does not
/// fit its 32-bit field.
pub fn encode_array_payload(items: &[Option<Value>], element_type: Oid) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(20 + items.len() * 8);
    let has_null = items
        .iter()
        .any(|item| item.as_ref().is_none_or(Value::is_null));

    write_u32(&mut buf, u32::from(!items.is_empty()));
    write_u32(&mut buf, u32::from(has_null));
    write_u32(&mut buf, element_type);

    if !items.is_empty() {
        write_u32(&mut buf, len_u32(items.len(), "array elements")?);
        write_u32(&mut buf, 1);
        for item in items {
            match item.as_ref().and_then(Value::bytes) {
                Some(raw) => {
                    write_u32(&mut buf, len_u32(raw.len(), "element bytes")?);
                    buf.extend_from_slice(raw);
                }
                None => write_u32(&mut buf, NULL_LENGTH),
            }
        }
    }
    Ok(buf)
}

/// Encode array elements into an array-typed binary [`Value`].
///
/// Fails with [`Error::NoArrayType`] if `element_type` has no array type.
pub fn encode_array(items: &[Option<Value>], element_type: Oid) -> Result<Value> {
    let array_type = array_type_of(element_type).ok_or(Error::NoArrayType(element_type))?;
    Ok(Value::binary(
        array_type,
        encode_array_payload(items, element_type)?,
    ))
}

/// Split an array payload into its element type and raw elements.
///
/// `Ok(None)` means the payload ended early.
fn split_elements(payload: &[u8]) -> Result<Option<(Oid, Vec<Option<&[u8]>>)>> {
    let Ok((is_not_empty, rest)) = read_u32(payload) else {
        return Ok(None);
    };
    let Ok((has_null, rest)) = read_u32(rest) else {
        return Ok(None);
    };
    let Ok((element_type, rest)) = read_u32(rest) else {
        return Ok(None);
    };
    if is_not_empty != 1 {
        return Ok(Some((element_type, Vec::new())));
    }
    let Ok((count, rest)) = read_u32(rest) else {
        return Ok(None);
    };
    let Ok((dimensions, mut data)) = read_u32(rest) else {
        return Ok(None);
    };
    if dimensions != 1 {
        return Err(Error::Unsupported(format!(
            "{}-dimensional arrays",
            dimensions
        )));
    }

    let mut elements = Vec::new();
    match has_null {
        0 => {
            while let Ok((len, rest)) = read_u32(data) {
                let Ok((element, rest)) = read_bytes(rest, len as usize) else {
                    break;
                };
                elements.push(Some(element));
                data = rest;
            }
        }
        1 => {
            for _ in 0..count {
                let Ok((len, rest)) = read_u32(data) else {
                    return Ok(None);
                };
                if len == NULL_LENGTH {
                    if !NULLABLE_ELEMENT_TYPES.contains(&element_type) {
                        return Err(Error::Decode(format!(
                            "NULL element in array of oid {} is not supported",
                            element_type
                        )));
                    }
                    elements.push(None);
                    data = rest;
                } else {
                    let Ok((element, rest)) = read_bytes(rest, len as usize) else {
                        return Ok(None);
                    };
                    elements.push(Some(element));
                    data = rest;
                }
            }
        }
        flag => {
            return Err(Error::Decode(format!("invalid array null flag {}", flag)));
        }
    }
    Ok(Some((element_type, elements)))
}

/// Raw array payload of `value`, or `None` if it is not a binary array.
fn array_payload(value: &Value) -> Option<&[u8]> {
    if value.format != FormatCode::Binary || element_type_of(value.type_oid).is_none() {
        return None;
    }
    value.bytes()
}

/// Decode an array-typed binary value into its elements.
///
/// Returns `Ok(None)` if the value is not a binary array (or is NULL, or is
/// truncated). NULL elements come back as values without payload.
pub fn decode_array(value: &Value) -> Result<Option<Vec<Value>>> {
    let Some(payload) = array_payload(value) else {
        return Ok(None);
    };
    let Some((element_type, elements)) = split_elements(payload)? else {
        return Ok(None);
    };
    Ok(Some(
        elements
            .into_iter()
            .map(|raw| Value::new(element_type, FormatCode::Binary, raw.map(<[u8]>::to_vec)))
            .collect(),
    ))
}

/// Decode an array value into a vector of `T`.
///
/// Returns `Ok(None)` if the value is not a decodable array or if any single
/// element fails to convert.
pub fn decode_array_of<'a, T: FromWireValue<'a>>(value: &'a Value) -> Result<Option<Vec<T>>> {
    let Some(payload) = array_payload(value) else {
        return Ok(None);
    };
    let Some((element_type, elements)) = split_elements(payload)? else {
        return Ok(None);
    };
    Ok(convert_elements(element_type, elements).ok())
}

fn convert_elements<'a, T: FromWireValue<'a>>(
    element_type: Oid,
    elements: Vec<Option<&'a [u8]>>,
) -> Result<Vec<T>> {
    elements
        .into_iter()
        .map(|raw| match raw {
            Some(raw) => T::from_binary(element_type, raw),
            None => T::from_null(),
        })
        .collect()
}

impl<'a, T: FromWireValue<'a>> FromWireValue<'a> for Vec<T> {
    fn from_text(oid: Oid, _bytes: &'a [u8]) -> Result<Self> {
        Err(Error::Decode(format!(
            "text-format array of oid {} is not supported",
            oid
        )))
    }

    fn from_binary(oid: Oid, bytes: &'a [u8]) -> Result<Self> {
        if element_type_of(oid).is_none() {
            return Err(Error::Decode(format!("oid {} is not an array type", oid)));
        }
        let (element_type, elements) = split_elements(bytes)?
            .ok_or_else(|| Error::Decode(format!("truncated array of oid {}", oid)))?;
        convert_elements(element_type, elements)
    }
}

impl<T: ToWireValue> ToWireValue for [T] {
    const OID: Oid = match array_type_of(T::OID) {
        Some(array_type) => array_type,
        None => panic!("element type has no array type"),
    };

    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        let items = self
            .iter()
            .map(|item| item.to_value().map(Some))
            .collect::<Result<Vec<_>>>()?;
        buf.extend_from_slice(&encode_array_payload(&items, T::OID)?);
        Ok(())
    }
}

impl<T: ToWireValue> ToWireValue for Vec<T> {
    const OID: Oid = <[T]>::OID;

    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        self.as_slice().encode(buf)
    }
}
