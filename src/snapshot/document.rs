//! Export file envelope
//!
//! A downloadable export is the snapshot flattened at the top level plus a
//! `metadata` object. Import accepts the wrapped form as well as a bare
//! snapshot.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::Snapshot;
use crate::error::AppError;

/// Snapshot with its optional file metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDocument {
    #[serde(flatten)]
    pub snapshot: Snapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ExportMetadata>,
    /// Every top-level field except `metadata`, in file order
    #[serde(skip)]
    payload: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportMetadata {
    pub exported_at: String,
    pub version: String,
    pub application: String,
    pub total_records: TotalRecords,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalRecords {
    #[serde(default)]
    pub students: usize,
    #[serde(default)]
    pub users: usize,
    #[serde(default)]
    pub tests: usize,
    #[serde(default)]
    pub test_results: usize,
}

impl SnapshotDocument {
    /// Wrap a snapshot with metadata and a checksum of its contents
    ///
    /// The checksum covers the snapshot fields exactly as they are emitted
    /// ahead of `metadata`.
    pub fn wrap(snapshot: Snapshot, version: &str, application: &str) -> Result<Self, AppError> {
        let payload = serde_json::to_value(&snapshot)?;
        let metadata = ExportMetadata {
            exported_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            version: version.to_string(),
            application: application.to_string(),
            total_records: TotalRecords {
                students: snapshot.students.len(),
                users: snapshot.users.len(),
                tests: snapshot.tests.len(),
                test_results: snapshot.test_results.len(),
            },
            checksum: Some(checksum(&payload)),
        };

        Ok(Self {
            snapshot,
            metadata: Some(metadata),
            payload: Some(payload),
        })
    }

    /// Fail with `ChecksumMismatch` when a recorded checksum no longer matches
    ///
    /// Parsed files are checked against their own fields in file order, not
    /// against a re-serialization of the typed snapshot.
    pub fn verify_checksum(&self) -> Result<(), AppError> {
        let Some(expected) = self.metadata.as_ref().and_then(|m| m.checksum.as_deref()) else {
            return Ok(());
        };

        let actual = match &self.payload {
            Some(payload) => checksum(payload),
            None => checksum(&serde_json::to_value(&self.snapshot)?),
        };
        if actual != expected {
            tracing::warn!(%expected, %actual, "Export checksum mismatch");
            return Err(AppError::ChecksumMismatch);
        }
        Ok(())
    }
}

/// Parse an uploaded export, wrapped or bare
pub fn parse_document(bytes: &[u8]) -> Result<SnapshotDocument, AppError> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| AppError::Validation(format!("invalid export file: {e}")))?;
    let Value::Object(fields) = value else {
        return Err(AppError::Validation(
            "export file must contain a JSON object".to_string(),
        ));
    };

    let payload: Map<String, Value> = fields
        .iter()
        .filter(|(key, _)| key.as_str() != "metadata")
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    let mut document: SnapshotDocument = serde_json::from_value(Value::Object(fields))
        .map_err(|e| AppError::Validation(format!("invalid export file: {e}")))?;
    document.payload = Some(Value::Object(payload));
    Ok(document)
}

/// `<app>_backup_<YYYY-MM-DD_HH-MM-SS>.json`
pub fn export_filename(app_name: &str, at: DateTime<Utc>) -> String {
    format!("{app_name}_backup_{}.json", at.format("%Y-%m-%d_%H-%M-%S"))
}

// =============================================================================
// Checksum
// =============================================================================

/// Order-dependent 32-bit rolling hash over compact JSON text
///
/// Keys are hashed in the order they appear, so a file checks out against
/// the hash the browser app computed with `JSON.stringify`. The hash runs
/// over UTF-16 code units and is rendered as signed hexadecimal, so a
/// negative hash starts with `-`.
pub fn checksum(value: &Value) -> String {
    let hash = value.to_string().encode_utf16().fold(0_i32, |hash, unit| {
        hash.wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(i32::from(unit))
    });

    if hash < 0 {
        format!("-{:x}", hash.unsigned_abs())
    } else {
        format!("{hash:x}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn sample_snapshot() -> Snapshot {
        Snapshot {
            cycle: Some("متوسط".to_string()),
            students: vec![json!({"id": "s1", "firstName": "Ali"})],
            ..Snapshot::default()
        }
    }

    #[test]
    fn checksum_matches_reference_values() {
        // `"a"` hashes the code units 34, 97, 34
        assert_eq!(checksum(&json!("a")), format!("{:x}", 34 * 31 * 31 + 97 * 31 + 34));
        assert_eq!(checksum(&json!({})), format!("{:x}", 123 * 31 + 125));
    }

    #[test]
    fn checksum_follows_key_order() {
        let a: Value = serde_json::from_str(r#"{"a":1,"b":[1,2]}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"b":[1,2],"a":1}"#).unwrap();
        assert_ne!(checksum(&a), checksum(&b));
        assert_eq!(checksum(&a), checksum(&a.clone()));
    }

    #[test]
    fn browser_export_with_recorded_checksum_verifies() {
        // Written by the browser app: `JSON.stringify(data, null, 2)` with the
        // checksum taken over `JSON.stringify(data)`.
        let file = r#"{
  "students": [
    { "id": "s1", "firstName": "أحمد", "level": "السنة الأولى متوسط" }
  ],
  "users": [],
  "settings": null,
  "tests": [],
  "testResults": [],
  "metadata": {
    "exportedAt": "2024-01-15T08:00:00.000Z",
    "version": "1.0",
    "application": "Arabic School Management",
    "totalRecords": { "students": 1, "users": 0, "tests": 0, "testResults": 0 },
    "checksum": "-50c25b22"
  }
}"#;

        let parsed = parse_document(file.as_bytes()).unwrap();
        parsed.verify_checksum().unwrap();
        assert_eq!(parsed.snapshot.students.len(), 1);
        assert!(parsed.snapshot.cycle.is_none());
    }

    #[test]
    fn reordered_browser_export_fails_checksum() {
        let file = r#"{"users":[],
            "students":[{"id":"s1","firstName":"أحمد","level":"السنة الأولى متوسط"}],
            "settings":null,"tests":[],"testResults":[],
            "metadata":{"exportedAt":"2024-01-15T08:00:00.000Z","version":"1.0",
            "application":"Arabic School Management","totalRecords":{},"checksum":"-50c25b22"}}"#;

        let parsed = parse_document(file.as_bytes()).unwrap();
        assert!(matches!(parsed.verify_checksum(), Err(AppError::ChecksumMismatch)));
    }

    #[test]
    fn pretty_printed_wrap_verifies_after_parse() {
        let document = SnapshotDocument::wrap(sample_snapshot(), "1.0", "test").unwrap();
        let bytes = serde_json::to_vec_pretty(&document).unwrap();

        let parsed = parse_document(&bytes).unwrap();
        assert_eq!(parsed.metadata.as_ref().unwrap().checksum, document.metadata.unwrap().checksum);
        parsed.verify_checksum().unwrap();
    }

    #[test]
    fn wrapped_document_verifies() {
        let document = SnapshotDocument::wrap(sample_snapshot(), "1.0", "test").unwrap();
        let bytes = serde_json::to_vec(&document).unwrap();

        let parsed = parse_document(&bytes).unwrap();
        assert_eq!(parsed.metadata.as_ref().unwrap().total_records.students, 1);
        parsed.verify_checksum().unwrap();
    }

    #[test]
    fn edited_document_fails_checksum() {
        let document = SnapshotDocument::wrap(sample_snapshot(), "1.0", "test").unwrap();
        let mut value = serde_json::to_value(&document).unwrap();
        value["students"][0]["firstName"] = json!("Omar");

        let parsed = parse_document(value.to_string().as_bytes()).unwrap();
        assert!(matches!(parsed.verify_checksum(), Err(AppError::ChecksumMismatch)));
    }

    #[test]
    fn bare_snapshot_is_accepted() {
        let bytes = br#"{"cycle":"X","students":[{"id":"s1"}]}"#;
        let parsed = parse_document(bytes).unwrap();

        assert!(parsed.metadata.is_none());
        assert_eq!(parsed.snapshot.cycle.as_deref(), Some("X"));
        assert!(parsed.snapshot.users.is_empty());
        parsed.verify_checksum().unwrap();
    }

    #[test]
    fn non_object_file_is_rejected() {
        assert!(matches!(parse_document(b"[1,2]"), Err(AppError::Validation(_))));
        assert!(matches!(parse_document(b"not json"), Err(AppError::Validation(_))));
    }

    #[test]
    fn filename_uses_timestamp() {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 8, 30, 5).unwrap();
        assert_eq!(
            export_filename("appamine", at),
            "appamine_backup_2024-01-15_08-30-05.json"
        );
    }
}
