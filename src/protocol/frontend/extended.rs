//! Extended query protocol messages.

use crate::error::Result;
use crate::protocol::codec::{MessageBuilder, len_i16, len_i32};
use crate::protocol::types::{FormatCode, Oid};
use crate::value::Value;

/// Write a Parse message to create a prepared statement.
///
/// - `name`: Statement name (empty string for unnamed statement)
/// - `query`: SQL query with $1, $2, ... placeholders
/// - `param_oids`: Parameter type OIDs (0 = let server infer)
pub fn write_parse(buf: &mut Vec<u8>, name: &str, query: &str, param_oids: &[Oid]) -> Result<()> {
    let count = len_i16(param_oids.len(), "parameter types")?;
    let mut msg = MessageBuilder::new(buf, super::msg_type::PARSE);
    msg.write_cstr(name);
    msg.write_cstr(query);
    msg.write_i16(count);
    for &oid in param_oids {
        msg.write_u32(oid);
    }
    msg.finish();
    Ok(())
}

/// Write a Bind message to create a portal from a prepared statement.
///
/// Each parameter carries its own format code. Every result column is
/// requested in binary format with a single result format code.
pub fn write_bind(buf: &mut Vec<u8>, portal: &str, statement: &str, params: &[Value]) -> Result<()> {
    let count = len_i16(params.len(), "parameters")?;
    let lengths = params
        .iter()
        .map(|param| {
            param
                .bytes()
                .map(|raw| len_i32(raw.len(), "parameter bytes"))
                .transpose()
        })
        .collect::<Result<Vec<_>>>()?;

    let mut msg = MessageBuilder::new(buf, super::msg_type::BIND);

    msg.write_cstr(portal);
    msg.write_cstr(statement);

    msg.write_i16(count);
    for param in params {
        msg.write_i16(param.format as i16);
    }

    // Parameter values (count + length-prefixed data, -1 for NULL)
    msg.write_i16(count);
    for (param, len) in params.iter().zip(lengths) {
        match (param.bytes(), len) {
            (Some(raw), Some(len)) => {
                msg.write_i32(len);
                msg.buf().extend_from_slice(raw);
            }
            _ => msg.write_i32(-1),
        }
    }

    msg.write_i16(1);
    msg.write_i16(FormatCode::Binary as i16);

    msg.finish();
    Ok(())
}

/// Write an Execute message to run a portal.
///
/// - `portal`: Portal name
/// - `max_rows`: Maximum number of rows to return (0 = unlimited)
pub fn write_execute(buf: &mut Vec<u8>, portal: &str, max_rows: i32) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::EXECUTE);
    msg.write_cstr(portal);
    msg.write_i32(max_rows);
    msg.finish();
}

/// Write a Describe message for a prepared statement.
///
/// The server answers with ParameterDescription followed by RowDescription
/// or NoData.
pub fn write_describe_statement(buf: &mut Vec<u8>, name: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::DESCRIBE);
    msg.write_u8(b'S');
    msg.write_cstr(name);
    msg.finish();
}

/// Write a Sync message.
///
/// This ends an extended query sequence; the server answers with
/// ReadyForQuery, also after an error.
pub fn write_sync(buf: &mut Vec<u8>) {
    let msg = MessageBuilder::new(buf, super::msg_type::SYNC);
    msg.finish();
}

/// Write the full unnamed Parse, Describe, Bind, Execute, Sync sequence for
/// one query.
///
/// Parameter types are declared from the values' OIDs. Fails with
/// [`Error::InvalidUsage`](crate::Error::InvalidUsage) if the parameters do
/// not fit the message format; `buf` may then hold a partial sequence.
pub fn write_extended_query(buf: &mut Vec<u8>, query: &str, params: &[Value]) -> Result<()> {
    let param_oids: Vec<Oid> = params.iter().map(|p| p.type_oid).collect();
    write_parse(buf, "", query, &param_oids)?;
    write_describe_statement(buf, "");
    write_bind(buf, "", "", params)?;
    write_execute(buf, "", 0);
    write_sync(buf);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::oid;

    fn frames(buf: &[u8]) -> Vec<(u8, &[u8])> {
        let mut out = Vec::new();
        let mut rest = buf;
        while !rest.is_empty() {
            let len = i32::from_be_bytes([rest[1], rest[2], rest[3], rest[4]]) as usize;
            out.push((rest[0], &rest[5..1 + len]));
            rest = &rest[1 + len..];
        }
        out
    }

    #[test]
    fn test_parse() {
        let mut buf = Vec::new();
        write_parse(&mut buf, "stmt1", "SELECT $1::int", &[0]).unwrap();

        assert_eq!(buf[0], b'P');
        let len = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        assert_eq!(len as usize, buf.len() - 1);
    }

    #[test]
    fn test_sync() {
        let mut buf = Vec::new();
        write_sync(&mut buf);
        assert_eq!(buf, [b'S', 0, 0, 0, 4]);
    }

    #[test]
    fn test_execute() {
        let mut buf = Vec::new();
        write_execute(&mut buf, "", 0);

        assert_eq!(buf[0], b'E');
        // Length: 4 + 1 (empty string + null) + 4 (max_rows) = 9
        let len = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        assert_eq!(len, 9);
    }

    #[test]
    fn bind_requests_binary_results() {
        let mut buf = Vec::new();
        let params = [Value::binary(oid::INT4, 5_i32.to_be_bytes()), Value::null(oid::TEXT)];
        write_bind(&mut buf, "", "", &params).unwrap();

        let (ty, body) = frames(&buf)[0];
        assert_eq!(ty, b'B');
        let expected: Vec<u8> = [
            &[0, 0][..],         // portal, statement
            &[0, 2, 0, 1, 0, 1], // two binary parameter formats
            &[0, 2],             // two values
            &[0, 0, 0, 4, 0, 0, 0, 5],
            &[0xff, 0xff, 0xff, 0xff],
            &[0, 1, 0, 1], // one result format: binary
        ]
        .concat();
        assert_eq!(body, expected);
    }

    #[test]
    fn extended_query_sequence() {
        let mut buf = Vec::new();
        write_extended_query(&mut buf, "SELECT $1", &[Value::binary(oid::INT8, [0; 8])]).unwrap();
        let types: Vec<u8> = frames(&buf).iter().map(|(ty, _)| *ty).collect();
        assert_eq!(types, b"PDBES");

        let (_, parse) = frames(&buf)[0];
        assert!(parse.ends_with(&[0, 1, 0, 0, 0, 20]));
        let (_, describe) = frames(&buf)[1];
        assert_eq!(describe, b"S\0");
    }

    #[test]
    fn too_many_parameters_is_rejected() {
        let params = vec![Value::null(oid::INT4); 40_000];
        let mut buf = Vec::new();
        assert!(matches!(
            write_extended_query(&mut buf, "SELECT 1", &params),
            Err(crate::Error::InvalidUsage(_))
        ));
    }
}
