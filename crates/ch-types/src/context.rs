//! Per-operation state threaded through the codec.
//!
//! No ambient per-thread state: the contexts are passed explicitly to
//! every codec entry point. The block framing layer updates
//! `column_name` as it walks columns so overrides and error messages
//! stay column-scoped.

use std::collections::HashMap;

use crate::formats::{FormatOverrides, ReadFormat};
use crate::tz::Tz;

/// How UTC-equivalent zones surface in decoded datetimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UtcTzMode {
    /// UTC-equivalent zones decode to naive datetimes.
    #[default]
    Naive,
    /// Zone-aware datetimes are always returned when a zone applies.
    Aware,
    /// Only zones declared in the column type stay aware; bare datetimes
    /// under the server zone come back naive.
    Schema,
}

/// State consulted while decoding a response.
#[derive(Debug, Clone)]
pub struct ReadContext {
    /// Substitute the absent-value sentinel for nulls; when false each
    /// type's zero value is used instead.
    pub use_none: bool,
    pub formats: FormatOverrides,
    /// Per-column time zone overrides.
    pub column_tzs: HashMap<String, Tz>,
    /// Per-query time zone override.
    pub query_tz: Option<Tz>,
    /// Zone reported by the server for this connection.
    pub server_tz: Option<Tz>,
    /// Whether bare DateTime columns adopt the server zone.
    pub apply_server_timezone: bool,
    pub utc_tz_mode: UtcTzMode,
    /// Treat dots in JSON paths as literal key characters instead of
    /// nesting separators.
    pub json_escape_dots: bool,
    /// Blocks carry the 8-byte block-info envelope ahead of the column
    /// count. Set when the connection pinned a client protocol version.
    pub block_info: bool,
    /// Current column scratch, set by the framing layer.
    pub column_name: String,
}

impl Default for ReadContext {
    fn default() -> Self {
        Self {
            use_none: true,
            formats: FormatOverrides::default(),
            column_tzs: HashMap::new(),
            query_tz: None,
            server_tz: None,
            apply_server_timezone: true,
            utc_tz_mode: UtcTzMode::default(),
            json_escape_dots: false,
            block_info: false,
            column_name: String::new(),
        }
    }
}

impl ReadContext {
    /// Active read format for the current column.
    pub fn read_format(&self, class_name: &str) -> ReadFormat {
        self.formats.resolve(&self.column_name, class_name)
    }

    /// Resolves the zone a datetime column decodes under.
    ///
    /// Priority: per-column override, per-query override, the column's
    /// declared zone, then the server zone when `apply_server_timezone`
    /// is set. The `utc_tz_mode` filter then decides whether a
    /// UTC-equivalent result stays aware.
    pub fn active_tz(&self, column_tz: Option<Tz>) -> Option<Tz> {
        let (tz, from_schema) = if let Some(tz) = self.column_tzs.get(&self.column_name) {
            (Some(*tz), false)
        } else if let Some(tz) = self.query_tz {
            (Some(tz), false)
        } else if let Some(tz) = column_tz {
            (Some(tz), true)
        } else if self.apply_server_timezone {
            (self.server_tz, false)
        } else {
            (None, false)
        };
        let tz = tz?;
        match self.utc_tz_mode {
            UtcTzMode::Aware => Some(tz),
            UtcTzMode::Naive => (!tz.is_utc_equivalent()).then_some(tz),
            UtcTzMode::Schema => {
                if from_schema {
                    Some(tz)
                } else {
                    (!tz.is_utc_equivalent()).then_some(tz)
                }
            }
        }
    }
}

/// State consulted while encoding an insert block.
#[derive(Debug, Clone, Default)]
pub struct WriteContext {
    /// Current column scratch, set by the block writer.
    pub column_name: String,
    /// JSON column serialization version tag; 0 selects the legacy
    /// string-only path with no version tag.
    pub json_serialization_version: u64,
}

impl WriteContext {
    pub fn new() -> Self {
        Self {
            column_name: String::new(),
            json_serialization_version: 1,
        }
    }
}
