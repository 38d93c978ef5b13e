//! The server settings catalog and per-request settings validation.
//!
//! At connect time the client loads `system.settings` into a
//! [`SettingsCatalog`]. Every outgoing request validates its settings
//! against the catalog: unknown or read-only names are dropped with a
//! warning (or rejected, or passed through, per the configured action),
//! and values identical to the client-level setting already in effect are
//! elided so they are not resent.

use std::collections::HashMap;

use ch_types::{Error, Result, Value};

/// Settings interpreted by the HTTP transport itself; they bypass catalog
/// validation.
pub const TRANSPORT_SETTINGS: &[&str] = &[
    "database",
    "buffer_size",
    "session_id",
    "compress",
    "decompress",
    "session_timeout",
    "session_check",
    "query_id",
    "quota_key",
    "wait_end_of_query",
    "send_progress_in_http_headers",
    "http_headers_progress_interval_ms",
    "enable_http_compression",
];

/// One row of the server's settings catalog.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SettingDef {
    pub value: String,
    pub changed: bool,
    pub readonly: bool,
    pub description: String,
    pub setting_type: String,
}

/// What to do with a setting the catalog rejects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InvalidSettingAction {
    /// Drop the setting with a warning.
    #[default]
    Drop,
    /// Send it anyway and let the server decide.
    Send,
    /// Raise a `ProgrammingError`.
    Error,
}

/// A client- or request-level setting value, stringified on the wire with
/// booleans as `1`/`0`.
#[derive(Debug, Clone, PartialEq)]
pub enum Setting {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Setting {
    pub fn as_wire(&self) -> String {
        match self {
            Setting::Bool(b) => if *b { "1" } else { "0" }.to_owned(),
            Setting::Int(v) => v.to_string(),
            Setting::Float(v) => v.to_string(),
            Setting::Str(s) => s.clone(),
        }
    }
}

impl From<bool> for Setting {
    fn from(v: bool) -> Self {
        Setting::Bool(v)
    }
}

impl From<i64> for Setting {
    fn from(v: i64) -> Self {
        Setting::Int(v)
    }
}

impl From<u64> for Setting {
    fn from(v: u64) -> Self {
        Setting::Int(v as i64)
    }
}

impl From<f64> for Setting {
    fn from(v: f64) -> Self {
        Setting::Float(v)
    }
}

impl From<&str> for Setting {
    fn from(v: &str) -> Self {
        Setting::Str(v.to_owned())
    }
}

impl From<String> for Setting {
    fn from(v: String) -> Self {
        Setting::Str(v)
    }
}

/// The server-reported settings map.
#[derive(Debug, Clone, Default)]
pub struct SettingsCatalog {
    settings: HashMap<String, SettingDef>,
}

impl SettingsCatalog {
    /// Builds the catalog from the rows of
    /// `SELECT name, value, changed, readonly, description, type FROM
    /// system.settings`.
    pub fn from_rows(rows: impl IntoIterator<Item = Vec<Value>>) -> Self {
        let mut settings = HashMap::new();
        for row in rows {
            let name = match row.first().and_then(Value::as_str) {
                Some(name) => name.to_owned(),
                None => continue,
            };
            let field = |ix: usize| -> String {
                row.get(ix).map(|v| v.to_string()).unwrap_or_default()
            };
            let flag = |ix: usize| -> bool {
                row.get(ix)
                    .is_some_and(|v| v.to_i128().unwrap_or(0) != 0 || v.as_bool() == Some(true))
            };
            settings.insert(
                name,
                SettingDef {
                    value: field(1),
                    changed: flag(2),
                    readonly: flag(3),
                    description: field(4),
                    setting_type: field(5),
                },
            );
        }
        Self { settings }
    }

    pub fn get(&self, name: &str) -> Option<&SettingDef> {
        self.settings.get(name)
    }

    pub fn len(&self) -> usize {
        self.settings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.settings.is_empty()
    }
}

/// Validates one setting. Returns the wire value to send, `None` to drop.
pub fn validate_setting(
    catalog: Option<&SettingsCatalog>,
    name: &str,
    value: &Setting,
    action: InvalidSettingAction,
) -> Result<Option<String>> {
    if TRANSPORT_SETTINGS.contains(&name) {
        return Ok(Some(value.as_wire()));
    }
    let Some(catalog) = catalog else {
        return Ok(Some(value.as_wire()));
    };
    let rejected = match catalog.get(name) {
        None => Some("unrecognized"),
        Some(def) if def.readonly => Some("read-only"),
        Some(_) => None,
    };
    if let Some(why) = rejected {
        match action {
            InvalidSettingAction::Send => {}
            InvalidSettingAction::Drop => {
                tracing::warn!(setting = name, why, "dropping invalid setting");
                return Ok(None);
            }
            InvalidSettingAction::Error => {
                return Err(Error::Programming(format!(
                    "setting '{name}' is {why} on this server"
                )));
            }
        }
    }
    Ok(Some(value.as_wire()))
}

/// Validates a per-request settings map against the catalog and the
/// client-level settings already in effect. Settings whose wire value
/// matches the client-level value are elided.
pub fn validate_settings(
    catalog: Option<&SettingsCatalog>,
    client_settings: &HashMap<String, String>,
    requested: &HashMap<String, Setting>,
    action: InvalidSettingAction,
) -> Result<HashMap<String, String>> {
    let mut out = HashMap::new();
    for (name, value) in requested {
        let Some(wire) = validate_setting(catalog, name, value, action)? else {
            continue;
        };
        if client_settings.get(name) == Some(&wire) {
            continue;
        }
        out.insert(name.clone(), wire);
    }
    Ok(out)
}
