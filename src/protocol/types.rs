//! Type OIDs, format codes and other small wire-level types.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Object identifier, used here for types.
pub type Oid = u32;

/// Well-known type OIDs from `pg_type`.
pub mod oid {
    use super::Oid;

    pub const BOOL: Oid = 16;
    pub const BYTEA: Oid = 17;
    pub const CHAR: Oid = 18;
    pub const NAME: Oid = 19;
    pub const INT8: Oid = 20;
    pub const INT2: Oid = 21;
    pub const INT4: Oid = 23;
    pub const TEXT: Oid = 25;
    pub const OID: Oid = 26;
    pub const JSON: Oid = 114;
    pub const FLOAT4: Oid = 700;
    pub const FLOAT8: Oid = 701;
    pub const BPCHAR: Oid = 1042;
    pub const VARCHAR: Oid = 1043;
    pub const NUMERIC: Oid = 1700;
    pub const UUID: Oid = 2950;
    pub const JSONB: Oid = 3802;

    pub const JSON_ARRAY: Oid = 199;
    pub const BOOL_ARRAY: Oid = 1000;
    pub const BYTEA_ARRAY: Oid = 1001;
    pub const CHAR_ARRAY: Oid = 1002;
    pub const NAME_ARRAY: Oid = 1003;
    pub const INT2_ARRAY: Oid = 1005;
    pub const INT4_ARRAY: Oid = 1007;
    pub const TEXT_ARRAY: Oid = 1009;
    pub const BPCHAR_ARRAY: Oid = 1014;
    pub const VARCHAR_ARRAY: Oid = 1015;
    pub const INT8_ARRAY: Oid = 1016;
    pub const FLOAT4_ARRAY: Oid = 1021;
    pub const FLOAT8_ARRAY: Oid = 1022;
    pub const OID_ARRAY: Oid = 1028;
    pub const NUMERIC_ARRAY: Oid = 1231;
    pub const UUID_ARRAY: Oid = 2951;
    pub const JSONB_ARRAY: Oid = 3807;
}

/// (element, array) type pairs known to the codec.
const ARRAY_TYPES: &[(Oid, Oid)] = &[
    (oid::BOOL, oid::BOOL_ARRAY),
    (oid::BYTEA, oid::BYTEA_ARRAY),
    (oid::CHAR, oid::CHAR_ARRAY),
    (oid::NAME, oid::NAME_ARRAY),
    (oid::INT8, oid::INT8_ARRAY),
    (oid::INT2, oid::INT2_ARRAY),
    (oid::INT4, oid::INT4_ARRAY),
    (oid::TEXT, oid::TEXT_ARRAY),
    (oid::OID, oid::OID_ARRAY),
    (oid::JSON, oid::JSON_ARRAY),
    (oid::FLOAT4, oid::FLOAT4_ARRAY),
    (oid::FLOAT8, oid::FLOAT8_ARRAY),
    (oid::BPCHAR, oid::BPCHAR_ARRAY),
    (oid::VARCHAR, oid::VARCHAR_ARRAY),
    (oid::NUMERIC, oid::NUMERIC_ARRAY),
    (oid::UUID, oid::UUID_ARRAY),
    (oid::JSONB, oid::JSONB_ARRAY),
];

/// Array type registered for an element type.
pub const fn array_type_of(element: Oid) -> Option<Oid> {
    let mut i = 0;
    while i < ARRAY_TYPES.len() {
        if ARRAY_TYPES[i].0 == element {
            return Some(ARRAY_TYPES[i].1);
        }
        i += 1;
    }
    None
}

/// Element type of an array type, or `None` if `array` is not an array type.
pub const fn element_type_of(array: Oid) -> Option<Oid> {
    let mut i = 0;
    while i < ARRAY_TYPES.len() {
        if ARRAY_TYPES[i].1 == array {
            return Some(ARRAY_TYPES[i].0);
        }
        i += 1;
    }
    None
}

/// Format of a parameter or column value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u16)]
pub enum FormatCode {
    #[default]
    Text = 0,
    /// Type-specific big-endian encoding
    Binary = 1,
}

impl FormatCode {
    /// Map a wire format code. Codes other than 1 read as text.
    pub fn from_u16(value: u16) -> Self {
        if value == Self::Binary as u16 {
            Self::Binary
        } else {
            Self::Text
        }
    }
}

impl From<u16> for FormatCode {
    fn from(value: u16) -> Self {
        Self::from_u16(value)
    }
}

impl std::fmt::Display for FormatCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Text => "text",
            Self::Binary => "binary",
        })
    }
}

/// Backend transaction state carried by ReadyForQuery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TransactionStatus {
    #[default]
    Idle = b'I',
    InTransaction = b'T',
    /// Statements are rejected until the block is rolled back.
    Failed = b'E',
}

impl TransactionStatus {
    /// Parse the status byte.
    pub fn from_byte(value: u8) -> Option<Self> {
        [Self::Idle, Self::InTransaction, Self::Failed]
            .into_iter()
            .find(|status| *status as u8 == value)
    }

    /// Inside a transaction block, failed or not.
    pub fn in_transaction(self) -> bool {
        self != Self::Idle
    }

    pub fn is_failed(self) -> bool {
        self == Self::Failed
    }
}

macro_rules! big_endian {
    ($($name:ident($native:ty; $width:literal)),* $(,)?) => {$(
        #[doc = concat!("`", stringify!($native), "` stored in network byte order, for zerocopy message structs.")]
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Default, FromBytes, IntoBytes, KnownLayout, Immutable,
        )]
        #[repr(C)]
        pub struct $name([u8; $width]);

        impl $name {
            pub const fn new(value: $native) -> Self {
                Self(value.to_be_bytes())
            }

            pub const fn get(self) -> $native {
                <$native>::from_be_bytes(self.0)
            }
        }
    )*};
}

big_endian! {
    I16BE(i16; 2),
    U16BE(u16; 2),
    I32BE(i32; 4),
    U32BE(u32; 4),
}
