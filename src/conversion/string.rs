//! String type implementations (&str, String).

use crate::error::{Error, Result};
use crate::protocol::types::{Oid, oid};

use super::{FromWireValue, ToWireValue};

fn check_text_oid(oid: Oid, target: &str) -> Result<()> {
    if matches!(
        oid,
        oid::TEXT | oid::VARCHAR | oid::BPCHAR | oid::NAME | oid::JSON
    ) {
        Ok(())
    } else {
        Err(Error::Decode(format!("cannot decode oid {} as {}", oid, target)))
    }
}

fn utf8(bytes: &[u8]) -> Result<&str> {
    simdutf8::compat::from_utf8(bytes).map_err(|e| Error::Decode(format!("invalid UTF-8: {}", e)))
}

// Text and binary representations of the text family are identical.

impl<'a> FromWireValue<'a> for &'a str {
    fn from_text(oid: Oid, bytes: &'a [u8]) -> Result<Self> {
        check_text_oid(oid, "str")?;
        utf8(bytes)
    }

    fn from_binary(oid: Oid, bytes: &'a [u8]) -> Result<Self> {
        check_text_oid(oid, "str")?;
        utf8(bytes)
    }
}

impl FromWireValue<'_> for String {
    fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
        check_text_oid(oid, "String")?;
        utf8(bytes).map(str::to_owned)
    }

    fn from_binary(oid: Oid, bytes: &[u8]) -> Result<Self> {
        check_text_oid(oid, "String")?;
        utf8(bytes).map(str::to_owned)
    }
}

impl ToWireValue for str {
    const OID: Oid = oid::TEXT;

    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(self.as_bytes());
        Ok(())
    }
}

impl ToWireValue for String {
    const OID: Oid = oid::TEXT;

    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        self.as_str().encode(buf)
    }
}
