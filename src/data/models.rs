//! Data models
//!
//! The storage layer is schema-free: records are JSON objects. This module
//! holds the record id type, timestamps and the settings singleton.
//! Ids are ULIDs and timestamps are ISO-8601 strings.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// =============================================================================
// ID Types
// =============================================================================

/// Entity ID wrapper (ULID format, 26 characters)
///
/// Example: "01ARZ3NDEKTSV4RRFFQ69G5FAV"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Generate a new ULID
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

/// Current time as an ISO-8601 string with millisecond precision
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

// =============================================================================
// Settings (singleton)
// =============================================================================

/// Key of the singleton settings record inside the `settings` partition
pub const SETTINGS_KEY: &str = "settings";

/// Application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    pub school_name: String,
    pub counselor_name: String,
    pub levels: Vec<String>,
    pub groups: Vec<String>,
    pub semesters: Vec<String>,
    pub timezone: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            school_name: "المتوسطة".to_string(),
            counselor_name: "مستشار(ة) التوجيه".to_string(),
            levels: vec![
                "السنة الأولى متوسط".to_string(),
                "السنة الثانية متوسط".to_string(),
                "السنة الثالثة متوسط".to_string(),
                "السنة الرابعة متوسط".to_string(),
            ],
            groups: (1..=6).map(|n| format!("الفوج {n}")).collect(),
            semesters: vec![
                "الفصل الأول".to_string(),
                "الفصل الثاني".to_string(),
                "الفصل الثالث".to_string(),
            ],
            timezone: "Africa/Tunis".to_string(),
            extra: Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_have_six_groups() {
        let settings = AppSettings::default();
        assert_eq!(settings.groups.len(), 6);
        assert_eq!(settings.groups[0], "الفوج 1");
        let value = serde_json::to_value(&settings).unwrap();
        assert_eq!(value["timezone"], "Africa/Tunis");
    }

    #[test]
    fn now_iso_uses_millisecond_utc_format() {
        let now = now_iso();
        assert!(now.ends_with('Z'));
        assert_eq!(now.len(), "2024-01-15T08:00:00.000Z".len());
    }
}
