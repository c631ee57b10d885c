//! E2E tests for snapshot export and import

mod common;

use common::{DEFAULT_CYCLE, TestServer};
use serde_json::{Value, json};

fn with_cycle(server: &TestServer, path: &str, cycle: &str) -> reqwest::Url {
    reqwest::Url::parse_with_params(&server.url(path), &[("cycle", cycle)]).unwrap()
}

#[tokio::test]
async fn test_export_download_has_attachment_headers() {
    let server = TestServer::new().await;
    server
        .create("students", DEFAULT_CYCLE, json!({ "name": "Ali" }))
        .await;

    let response = server
        .client
        .get(server.url("/api/export"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let disposition = response
        .headers()
        .get("content-disposition")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.starts_with("attachment; filename=\"appamine_backup_"));
    assert!(disposition.ends_with(".json\""));

    let document: Value = response.json().await.unwrap();
    assert_eq!(document["cycle"], DEFAULT_CYCLE);
    assert_eq!(document["metadata"]["totalRecords"]["students"], 1);
    assert!(document["metadata"]["checksum"].is_string());
}

#[tokio::test]
async fn test_export_file_imports_into_other_cycle() {
    let server = TestServer::new().await;
    server
        .create("students", DEFAULT_CYCLE, json!({ "id": "s1", "name": "Ali" }))
        .await;
    server
        .create("users", DEFAULT_CYCLE, json!({ "id": "u1", "username": "admin" }))
        .await;

    let body = server
        .client
        .get(server.url("/api/export"))
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();

    let summary: Value = server
        .client
        .post(with_cycle(&server, "/api/import", "ثانوي"))
        .body(body)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(summary["success"], true);
    assert_eq!(summary["cycle"], "ثانوي");
    assert_eq!(summary["full"], false);

    assert_eq!(server.list("students", "ثانوي").await.len(), 1);
    assert_eq!(server.list("students", DEFAULT_CYCLE).await.len(), 1);

    // Scoped import takes a safety backup of the target cycle
    let backups: Vec<Value> = server
        .client
        .get(server.url("/api/backups"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(backups.iter().any(|b| b["cycle"] == "ثانوي"));
}

#[tokio::test]
async fn test_tampered_export_is_rejected() {
    let server = TestServer::new().await;
    server
        .create("students", DEFAULT_CYCLE, json!({ "id": "s1", "name": "Ali" }))
        .await;

    let mut document: Value = server
        .client
        .get(server.url("/api/export"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    document["students"][0]["name"] = json!("Omar");

    let response = server
        .client
        .post(server.url("/api/import"))
        .json(&document)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 422);

    let students = server.list("students", DEFAULT_CYCLE).await;
    assert_eq!(students[0]["name"], "Ali");
}

#[tokio::test]
async fn test_browser_export_with_checksum_imports() {
    let server = TestServer::new().await;
    // Checksum computed by the browser app over `JSON.stringify` of the data fields
    let file = r#"{
        "students": [{ "id": "s1", "firstName": "أحمد", "level": "السنة الأولى متوسط" }],
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

    let response = server
        .client
        .post(server.url("/api/import"))
        .header("Content-Type", "application/json")
        .body(file)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let students = server.list("students", DEFAULT_CYCLE).await;
    assert_eq!(students.len(), 1);
    assert_eq!(students[0]["firstName"], "أحمد");
}

#[tokio::test]
async fn test_non_json_upload_is_rejected() {
    let server = TestServer::new().await;

    let response = server
        .client
        .post(server.url("/api/import"))
        .body("not json at all")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_full_snapshot_import_replaces_users() {
    let server = TestServer::new().await;
    server
        .create("users", DEFAULT_CYCLE, json!({ "id": "old", "username": "old" }))
        .await;

    let snapshot = json!({
        "cycle": DEFAULT_CYCLE,
        "students": [{ "id": "s1", "name": "Ali" }],
        "users": [{ "id": "new", "username": "new" }],
        "grades": [{ "studentId": "s1", "value": 11 }]
    });

    let summary: Value = server
        .client
        .post(server.url("/api/snapshot/import"))
        .json(&snapshot)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(summary["full"], true);

    let users = server.list("users", DEFAULT_CYCLE).await;
    assert_eq!(users.len(), 1);
    assert_eq!(users[0]["id"], "new");

    // Records without an id get one on import
    let grades = server.list("grades", DEFAULT_CYCLE).await;
    assert_eq!(grades.len(), 1);
    assert!(grades[0]["id"].is_string());
}

#[tokio::test]
async fn test_scoped_snapshot_import_keeps_users() {
    let server = TestServer::new().await;
    server
        .create("users", DEFAULT_CYCLE, json!({ "id": "keep", "username": "keep" }))
        .await;

    let snapshot = json!({
        "students": [{ "id": "s1" }],
        "users": [{ "id": "ignored" }]
    });

    let response = server
        .client
        .post(with_cycle(&server, "/api/snapshot/import", "ثانوي"))
        .json(&snapshot)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let users = server.list("users", DEFAULT_CYCLE).await;
    assert_eq!(users.len(), 1);
    assert_eq!(users[0]["id"], "keep");
    assert_eq!(server.list("students", "ثانوي").await.len(), 1);
}

#[tokio::test]
async fn test_snapshot_export_round_trips_settings() {
    let server = TestServer::new().await;
    server
        .client
        .patch(server.url("/api/settings"))
        .json(&json!({ "schoolName": "متوسطة النور" }))
        .send()
        .await
        .unwrap();

    let snapshot: Value = server
        .client
        .get(server.url("/api/snapshot"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(snapshot["settings"]["schoolName"], "متوسطة النور");

    server
        .client
        .post(with_cycle(&server, "/api/snapshot/import", "ثانوي"))
        .json(&snapshot)
        .send()
        .await
        .unwrap();

    let settings: Value = server
        .client
        .get(with_cycle(&server, "/api/settings", "ثانوي"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(settings["schoolName"], "متوسطة النور");
}
