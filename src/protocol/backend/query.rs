//! Query result backend messages.

use std::mem::size_of;

use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::error::{Error, Result};
use crate::protocol::codec::{len_i32, read_bytes, read_cstr, read_i32, read_u16, write_i32};
use crate::protocol::types::{FormatCode, I16BE, I32BE, Oid, U16BE, U32BE};

/// Fixed-size tail of a field description (18 bytes).
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct FieldDescriptionTail {
    /// Table OID (0 if not a table column)
    pub table_oid: U32BE,
    /// Column attribute number (0 if not a table column)
    pub column_id: I16BE,
    /// Data type OID
    pub type_oid: U32BE,
    /// Type size (-1 for variable, -2 for null-terminated)
    pub type_size: I16BE,
    /// Type modifier (type-specific)
    pub type_modifier: I32BE,
    /// Format code (0=text, 1=binary)
    pub format: U16BE,
}

/// Column metadata from a RowDescription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescription {
    /// Column name
    pub name: String,
    /// Table OID (0 if not a table column)
    pub table_oid: Oid,
    /// Column attribute number (0 if not a table column)
    pub column_attribute_number: i16,
    /// Data type OID
    pub data_type: Oid,
    /// Type size (-1 for variable, -2 for null-terminated)
    pub data_type_size: i16,
    /// Type modifier (type-specific)
    pub data_type_modifier: i32,
    /// Format the column values are delivered in
    pub format: FormatCode,
}

impl From<(&str, &FieldDescriptionTail)> for ColumnDescription {
    fn from((name, tail): (&str, &FieldDescriptionTail)) -> Self {
        Self {
            name: name.to_string(),
            table_oid: tail.table_oid.get(),
            column_attribute_number: tail.column_id.get(),
            data_type: tail.type_oid.get(),
            data_type_size: tail.type_size.get(),
            data_type_modifier: tail.type_modifier.get(),
            format: FormatCode::from_u16(tail.format.get()),
        }
    }
}

/// RowDescription message - describes the columns in a result set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowDescription {
    columns: Vec<ColumnDescription>,
}

impl RowDescription {
    /// Parse a RowDescription message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        const TAIL_SIZE: usize = size_of::<FieldDescriptionTail>();

        let (num_fields, mut data) = read_u16(payload)?;
        let mut columns = Vec::with_capacity(num_fields as usize);

        for _ in 0..num_fields {
            let (name, rest) = read_cstr(data)?;
            let (tail, rest) = read_bytes(rest, TAIL_SIZE)?;
            let tail = FieldDescriptionTail::ref_from_bytes(tail)
                .map_err(|e| Error::Protocol(format!("FieldDescription tail: {e:?}")))?;
            columns.push(ColumnDescription::from((name, tail)));
            data = rest;
        }

        Ok(Self { columns })
    }

    /// Get the number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Check if there are no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Get column descriptions.
    pub fn columns(&self) -> &[ColumnDescription] {
        &self.columns
    }

    /// Take the column descriptions.
    pub fn into_columns(self) -> Vec<ColumnDescription> {
        self.columns
    }
}

impl From<Vec<ColumnDescription>> for RowDescription {
    fn from(columns: Vec<ColumnDescription>) -> Self {
        Self { columns }
    }
}

/// DataRow message - one row of results.
///
/// Holds the raw column section of the message; values are sliced out on
/// access. The layout is validated once in [`DataRow::parse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRow {
    num_columns: u16,
    columns_data: Vec<u8>,
}

impl DataRow {
    /// Parse a DataRow message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (num_columns, columns_data) = read_u16(payload)?;

        let mut data = columns_data;
        for _ in 0..num_columns {
            let (len, rest) = read_i32(data)?;
            data = match len {
                -1 => rest,
                len if len >= 0 => read_bytes(rest, len as usize)?.1,
                len => {
                    return Err(Error::Protocol(format!("DataRow: invalid value length {len}")));
                }
            };
        }
        if !data.is_empty() {
            return Err(Error::Protocol(format!(
                "DataRow: {} trailing bytes",
                data.len()
            )));
        }

        Ok(Self {
            num_columns,
            columns_data: columns_data.to_vec(),
        })
    }

    /// Build a row from column values (`None` is NULL).
    ///
    /// Fails with [`Error::InvalidUsage`] past 65535 columns or for a value
    /// longer than `i32::MAX` bytes.
    pub fn from_columns<'a, I>(columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = Option<&'a [u8]>>,
    {
        let mut num_columns = 0u16;
        let mut columns_data = Vec::new();
        for column in columns {
            num_columns = num_columns
                .checked_add(1)
                .ok_or_else(|| Error::InvalidUsage("DataRow: more than 65535 columns".into()))?;
            match column {
                Some(bytes) => {
                    write_i32(&mut columns_data, len_i32(bytes.len(), "column bytes")?);
                    columns_data.extend_from_slice(bytes);
                }
                None => write_i32(&mut columns_data, -1),
            }
        }
        Ok(Self {
            num_columns,
            columns_data,
        })
    }

    /// Get the number of columns.
    pub fn len(&self) -> usize {
        self.num_columns as usize
    }

    /// Check if there are no columns.
    pub fn is_empty(&self) -> bool {
        self.num_columns == 0
    }

    /// Create an iterator over column values.
    ///
    /// Each item is `Option<&[u8]>` where `None` represents NULL.
    pub fn iter(&self) -> DataRowIter<'_> {
        DataRowIter {
            remaining: &self.columns_data,
        }
    }

    /// Get a column value by index.
    ///
    /// Returns `None` if out of range, `Some(None)` for NULL.
    pub fn get(&self, index: usize) -> Option<Option<&[u8]>> {
        self.iter().nth(index)
    }
}

/// Iterator over column values in a DataRow.
#[derive(Debug, Clone)]
pub struct DataRowIter<'a> {
    remaining: &'a [u8],
}

impl<'a> Iterator for DataRowIter<'a> {
    type Item = Option<&'a [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        let (len, rest) = read_i32(self.remaining).ok()?;
        if len < 0 {
            self.remaining = rest;
            return Some(None);
        }
        let (value, rest) = read_bytes(rest, len as usize).ok()?;
        self.remaining = rest;
        Some(Some(value))
    }
}

/// CommandComplete message - successful completion of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandComplete {
    /// Command tag (e.g., "SELECT 5", "INSERT 0 1", "UPDATE 10")
    pub tag: String,
}

impl CommandComplete {
    /// Parse a CommandComplete message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (tag, _) = read_cstr(payload)?;
        Ok(Self {
            tag: tag.to_string(),
        })
    }

    /// Parse the number of rows affected from the command tag.
    pub fn rows_affected(&self) -> Option<u64> {
        rows_affected(&self.tag)
    }
}

/// Number of rows affected according to a command tag such as `"DELETE 3"`.
///
/// Returns `None` for commands that do not report a count.
pub fn rows_affected(tag: &str) -> Option<u64> {
    let parts: Vec<&str> = tag.split_whitespace().collect();

    match parts.as_slice() {
        ["INSERT", _oid, count] => count.parse().ok(),
        ["SELECT" | "UPDATE" | "DELETE" | "MERGE" | "COPY" | "MOVE" | "FETCH", count] => {
            count.parse().ok()
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::oid;

    fn row_description_payload() -> Vec<u8> {
        let mut payload = vec![0, 1];
        payload.extend_from_slice(b"version\0");
        payload.extend_from_slice(&0_u32.to_be_bytes());
        payload.extend_from_slice(&0_i16.to_be_bytes());
        payload.extend_from_slice(&oid::TEXT.to_be_bytes());
        payload.extend_from_slice(&(-1_i16).to_be_bytes());
        payload.extend_from_slice(&(-1_i32).to_be_bytes());
        payload.extend_from_slice(&0_u16.to_be_bytes());
        payload
    }

    #[test]
    fn parse_row_description() {
        let desc = RowDescription::parse(&row_description_payload()).unwrap();
        assert_eq!(desc.len(), 1);
        let col = &desc.columns()[0];
        assert_eq!(col.name, "version");
        assert_eq!(col.data_type, oid::TEXT);
        assert_eq!(col.data_type_size, -1);
        assert_eq!(col.format, FormatCode::Text);
    }

    #[test]
    fn truncated_row_description() {
        let payload = row_description_payload();
        assert!(RowDescription::parse(&payload[..payload.len() - 1]).is_err());
    }

    #[test]
    fn data_row_values_and_nulls() {
        let row = DataRow::from_columns([Some(b"abc".as_slice()), None, Some(b"".as_slice())]).unwrap();
        assert_eq!(row.len(), 3);
        let values: Vec<_> = row.iter().collect();
        assert_eq!(values, vec![Some(b"abc".as_slice()), None, Some(b"".as_slice())]);
        assert_eq!(row.get(1), Some(None));
        assert_eq!(row.get(3), None);
    }

    #[test]
    fn data_row_parse_validates_layout() {
        let mut payload = vec![0, 2];
        payload.extend_from_slice(&3_i32.to_be_bytes());
        payload.extend_from_slice(b"abc");
        payload.extend_from_slice(&(-1_i32).to_be_bytes());
        let row = DataRow::parse(&payload).unwrap();
        assert_eq!(row, DataRow::from_columns([Some(b"abc".as_slice()), None]).unwrap());

        assert!(DataRow::parse(&payload[..payload.len() - 2]).is_err());
        payload.push(0);
        assert!(DataRow::parse(&payload).is_err());
    }

    #[test]
    fn data_row_column_limit() {
        let widest = DataRow::from_columns(std::iter::repeat_n(None, 65535)).unwrap();
        assert_eq!(widest.len(), 65535);
        assert!(matches!(
            DataRow::from_columns(std::iter::repeat_n(None, 65536)),
            Err(Error::InvalidUsage(_))
        ));
    }

    #[test]
    fn command_tags() {
        assert_eq!(rows_affected("DELETE 1"), Some(1));
        assert_eq!(rows_affected("INSERT 0 7"), Some(7));
        assert_eq!(rows_affected("CREATE TABLE"), None);
        let complete = CommandComplete::parse(b"SELECT 2\0").unwrap();
        assert_eq!(complete.tag, "SELECT 2");
        assert_eq!(complete.rows_affected(), Some(2));
    }
}
