//! The codec seam: turning driver rows into application records.

use crate::error::Result;
use crate::types::RawValue;

/// Converts a raw driver row into an application-level record.
///
/// A shape mismatch must surface as `Error::Parsing` carrying the raw
/// values and the expected target description, typically built with
/// [`crate::Error::parsing`].
pub trait RowCodec: Send {
    type Row: Send;

    /// Human-readable description of the target record type, used in
    /// parsing errors.
    fn expected(&self) -> &str;

    fn decode_row(&self, raw: &[RawValue]) -> Result<Self::Row>;
}

/// Identity codec: hands rows through untouched. Cannot fail.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawRows;

impl RowCodec for RawRows {
    type Row = Vec<RawValue>;

    fn expected(&self) -> &str {
        "raw row"
    }

    fn decode_row(&self, raw: &[RawValue]) -> Result<Self::Row> {
        Ok(raw.to_vec())
    }
}
