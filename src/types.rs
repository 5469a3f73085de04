//! Value and type identifiers shared between the engine and its drivers.
//!
//! The engine never interprets values: it carries `RawValue`s between the
//! caller, the driver, and the codec. Interpretation belongs to the codec.

/// A driver-native value.
///
/// This is the currency of the `Driver` and `RowCodec` seams. The engine
/// moves these around opaquely; only the codec gives them meaning.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

/// A declared parameter type identifier, as understood by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeOid(pub u32);

impl TypeOid {
    pub const BOOL: TypeOid = TypeOid(16);
    pub const BYTEA: TypeOid = TypeOid(17);
    pub const INT8: TypeOid = TypeOid(20);
    pub const TEXT: TypeOid = TypeOid(25);
    pub const FLOAT8: TypeOid = TypeOid(701);
}

impl std::fmt::Display for TypeOid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
