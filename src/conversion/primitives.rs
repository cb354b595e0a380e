//! Primitive type implementations (bool, integers, floats).

use crate::error::{Error, Result};
use crate::protocol::types::{Oid, oid};

use super::{FromWireValue, ToWireValue};

fn mismatch(oid: Oid, target: &str) -> Error {
    Error::Decode(format!("cannot decode oid {} as {}", oid, target))
}

fn parse_text<T: std::str::FromStr>(bytes: &[u8], target: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    let s = simdutf8::compat::from_utf8(bytes)
        .map_err(|e| Error::Decode(format!("invalid UTF-8: {}", e)))?;
    s.parse()
        .map_err(|e| Error::Decode(format!("invalid {}: {}", target, e)))
}

fn fixed<const N: usize>(bytes: &[u8], target: &str) -> Result<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| Error::Decode(format!("invalid {} length: {}", target, bytes.len())))
}

// === Boolean ===

impl FromWireValue<'_> for bool {
    fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
        if oid != oid::BOOL {
            return Err(mismatch(oid, "bool"));
        }
        match bytes {
            b"t" | b"true" | b"TRUE" | b"T" | b"1" => Ok(true),
            b"f" | b"false" | b"FALSE" | b"F" | b"0" => Ok(false),
            _ => Err(Error::Decode(format!(
                "invalid boolean: {:?}",
                String::from_utf8_lossy(bytes)
            ))),
        }
    }

    fn from_binary(oid: Oid, bytes: &[u8]) -> Result<Self> {
        if oid != oid::BOOL {
            return Err(mismatch(oid, "bool"));
        }
        let [b] = fixed::<1>(bytes, "boolean")?;
        Ok(b != 0)
    }
}

impl ToWireValue for bool {
    const OID: Oid = oid::BOOL;

    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.push(u8::from(*self));
        Ok(())
    }
}

// === Integer types ===

impl FromWireValue<'_> for i16 {
    fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
        if oid != oid::INT2 {
            return Err(mismatch(oid, "i16"));
        }
        parse_text(bytes, "i16")
    }

    fn from_binary(oid: Oid, bytes: &[u8]) -> Result<Self> {
        if oid != oid::INT2 {
            return Err(mismatch(oid, "i16"));
        }
        Ok(i16::from_be_bytes(fixed(bytes, "i16")?))
    }
}

impl ToWireValue for i16 {
    const OID: Oid = oid::INT2;

    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(&self.to_be_bytes());
        Ok(())
    }
}

impl FromWireValue<'_> for i32 {
    fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
        if !matches!(oid, oid::INT2 | oid::INT4) {
            return Err(mismatch(oid, "i32"));
        }
        parse_text(bytes, "i32")
    }

    fn from_binary(oid: Oid, bytes: &[u8]) -> Result<Self> {
        match oid {
            oid::INT2 => Ok(i16::from_be_bytes(fixed(bytes, "i16")?) as i32),
            oid::INT4 => Ok(i32::from_be_bytes(fixed(bytes, "i32")?)),
            _ => Err(mismatch(oid, "i32")),
        }
    }
}

impl ToWireValue for i32 {
    const OID: Oid = oid::INT4;

    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(&self.to_be_bytes());
        Ok(())
    }
}

impl FromWireValue<'_> for i64 {
    fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
        if !matches!(oid, oid::INT2 | oid::INT4 | oid::INT8) {
            return Err(mismatch(oid, "i64"));
        }
        parse_text(bytes, "i64")
    }

    fn from_binary(oid: Oid, bytes: &[u8]) -> Result<Self> {
        match oid {
            oid::INT2 => Ok(i16::from_be_bytes(fixed(bytes, "i16")?) as i64),
            oid::INT4 => Ok(i32::from_be_bytes(fixed(bytes, "i32")?) as i64),
            oid::INT8 => Ok(i64::from_be_bytes(fixed(bytes, "i64")?)),
            _ => Err(mismatch(oid, "i64")),
        }
    }
}

impl ToWireValue for i64 {
    const OID: Oid = oid::INT8;

    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(&self.to_be_bytes());
        Ok(())
    }
}

// === OID (u32) ===

impl FromWireValue<'_> for u32 {
    fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
        if oid != oid::OID {
            return Err(mismatch(oid, "u32"));
        }
        parse_text(bytes, "oid")
    }

    fn from_binary(oid: Oid, bytes: &[u8]) -> Result<Self> {
        if oid != oid::OID {
            return Err(mismatch(oid, "u32"));
        }
        Ok(u32::from_be_bytes(fixed(bytes, "oid")?))
    }
}

impl ToWireValue for u32 {
    const OID: Oid = oid::OID;

    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(&self.to_be_bytes());
        Ok(())
    }
}

// === Floating point types ===

fn parse_float_text(bytes: &[u8], target: &str) -> Result<f64> {
    let s = simdutf8::compat::from_utf8(bytes)
        .map_err(|e| Error::Decode(format!("invalid UTF-8: {}", e)))?;
    match s {
        "NaN" => Ok(f64::NAN),
        "Infinity" => Ok(f64::INFINITY),
        "-Infinity" => Ok(f64::NEG_INFINITY),
        _ => s
            .parse()
            .map_err(|e| Error::Decode(format!("invalid {}: {}", target, e))),
    }
}

impl FromWireValue<'_> for f32 {
    fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
        if oid != oid::FLOAT4 {
            return Err(mismatch(oid, "f32"));
        }
        Ok(parse_float_text(bytes, "f32")? as f32)
    }

    fn from_binary(oid: Oid, bytes: &[u8]) -> Result<Self> {
        if oid != oid::FLOAT4 {
            return Err(mismatch(oid, "f32"));
        }
        Ok(f32::from_be_bytes(fixed(bytes, "f32")?))
    }
}

impl ToWireValue for f32 {
    const OID: Oid = oid::FLOAT4;

    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(&self.to_be_bytes());
        Ok(())
    }
}

impl FromWireValue<'_> for f64 {
    fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
        if !matches!(oid, oid::FLOAT4 | oid::FLOAT8) {
            return Err(mismatch(oid, "f64"));
        }
        parse_float_text(bytes, "f64")
    }

    fn from_binary(oid: Oid, bytes: &[u8]) -> Result<Self> {
        match oid {
            oid::FLOAT4 => Ok(f32::from_be_bytes(fixed(bytes, "f32")?) as f64),
            oid::FLOAT8 => Ok(f64::from_be_bytes(fixed(bytes, "f64")?)),
            _ => Err(mismatch(oid, "f64")),
        }
    }
}

impl ToWireValue for f64 {
    const OID: Oid = oid::FLOAT8;

    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(&self.to_be_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bool() {
        assert!(bool::from_text(oid::BOOL, b"t").unwrap());
        assert!(!bool::from_binary(oid::BOOL, &[0]).unwrap());
        assert!(bool::from_binary(oid::BOOL, &[0, 1]).is_err());
        assert_eq!(true.to_value().unwrap().raw, Some(vec![1]));
    }

    #[test]
    fn test_integer_widening() {
        assert_eq!(i64::from_binary(oid::INT2, &[0xff, 0xfe]).unwrap(), -2);
        assert_eq!(i32::from_binary(oid::INT4, &7_i32.to_be_bytes()).unwrap(), 7);
        assert!(i16::from_binary(oid::INT4, &[0, 0, 0, 1]).is_err());
        assert_eq!(i64::from_text(oid::INT8, b"-9").unwrap(), -9);
    }

    #[test]
    fn test_float() {
        let v = 1.5_f64.to_value().unwrap();
        assert_eq!(v.type_oid, oid::FLOAT8);
        assert_eq!(v.decode::<f64>().unwrap(), 1.5);
        assert!(f64::from_text(oid::FLOAT8, b"NaN").unwrap().is_nan());
    }
}
