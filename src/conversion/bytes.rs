//! `bytea` conversions for `&[u8]` and `Vec<u8>`.

use crate::error::{Error, Result};
use crate::protocol::types::{Oid, oid};

use super::{FromWireValue, ToWireValue};

fn expect_bytea(type_oid: Oid, target: &str) -> Result<()> {
    if type_oid == oid::BYTEA {
        Ok(())
    } else {
        Err(Error::decode(format!("type {type_oid} is not bytea, wanted {target}")))
    }
}

impl<'a> FromWireValue<'a> for &'a [u8] {
    fn from_text(type_oid: Oid, _bytes: &'a [u8]) -> Result<Self> {
        // Text bytea is escaped, so there is nothing to borrow.
        Err(Error::decode(format!(
            "text-format value of type {type_oid} cannot be borrowed as &[u8]"
        )))
    }

    fn from_binary(type_oid: Oid, bytes: &'a [u8]) -> Result<Self> {
        expect_bytea(type_oid, "&[u8]").map(|()| bytes)
    }
}

impl FromWireValue<'_> for Vec<u8> {
    fn from_text(type_oid: Oid, bytes: &[u8]) -> Result<Self> {
        expect_bytea(type_oid, "Vec<u8>")?;
        match bytes.strip_prefix(b"\\x") {
            Some(hex) => unhex(hex),
            None => Ok(bytes.to_vec()),
        }
    }

    fn from_binary(type_oid: Oid, bytes: &[u8]) -> Result<Self> {
        expect_bytea(type_oid, "Vec<u8>").map(|()| bytes.to_vec())
    }
}

macro_rules! bytea_param {
    ($($ty:ty),*) => {$(
        impl ToWireValue for $ty {
            const OID: Oid = oid::BYTEA;

            fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
                buf.extend_from_slice(self);
                Ok(())
            }
        }
    )*};
}

bytea_param!([u8], Vec<u8>);

fn unhex(hex: &[u8]) -> Result<Vec<u8>> {
    let nibble = |c: u8| -> Result<u8> {
        (c as char)
            .to_digit(16)
            .map(|d| d as u8)
            .ok_or_else(|| Error::decode(format!("bad hex digit {:?} in bytea", c as char)))
    };
    let pairs = hex.chunks_exact(2);
    if !pairs.remainder().is_empty() {
        return Err(Error::decode("odd number of hex digits in bytea"));
    }
    pairs
        .map(|pair| Ok((nibble(pair[0])? << 4) | nibble(pair[1])?))
        .collect()
}
