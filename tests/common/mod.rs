//! Common test utilities for bitable-dl end-to-end tests
//!
//! A [`wiremock::MockServer`] stands in for both the Feishu open platform and
//! the CDN serving media, so a real [`BitableDownloader`] runs unmodified.

#![allow(dead_code)]

use bitable_dl::{BitableDownloader, Config, Event, SourceSettings};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TENANT_TOKEN: &str = "t-e2e-tenant-token";
pub const BASE_TOKEN: &str = "bascnE2E";
pub const TABLE_ID: &str = "tblE2E";

/// Source settings pointing at [`BASE_TOKEN`]/[`TABLE_ID`]
pub fn e2e_settings() -> SourceSettings {
    SourceSettings {
        app_id: "cli_e2e".to_string(),
        app_secret: "e2e-secret".to_string(),
        base_token: BASE_TOKEN.to_string(),
        table_id: TABLE_ID.to_string(),
        field_video: "Video".to_string(),
        field_script: "Script No".to_string(),
        save_dir: "Clips".to_string(),
    }
}

/// Build a downloader whose API base URL is the mock server
pub async fn create_e2e_downloader(server: &MockServer) -> (BitableDownloader, TempDir) {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");

    let mut config = Config {
        api_base_url: server.uri(),
        ..Default::default()
    };
    config.persistence.database_path = temp_dir.path().join("e2e.db");
    config.download.download_root = temp_dir.path().join("downloads");
    config.download.max_concurrent_downloads = 2;
    config.download.submit_timeout = Duration::from_secs(5);
    config.download.stop_wait_timeout = Duration::from_secs(5);
    config.download.stop_poll_interval = Duration::from_millis(20);
    config.download.request_timeout = Duration::from_secs(5);

    let downloader = BitableDownloader::new(config)
        .await
        .expect("Failed to create downloader");
    (downloader, temp_dir)
}

/// Mount a successful tenant token endpoint
pub async fn mount_auth(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/open-apis/auth/v3/tenant_access_token/internal"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "msg": "ok",
            "tenant_access_token": TENANT_TOKEN,
            "expire": 7200
        })))
        .mount(server)
        .await;
}

fn records_path() -> String {
    format!("/open-apis/bitable/v1/apps/{BASE_TOKEN}/tables/{TABLE_ID}/records")
}

/// Mount a single-page record listing
pub async fn mount_records(server: &MockServer, items: Vec<Value>) {
    Mock::given(method("GET"))
        .and(path(records_path()))
        .and(header("authorization", format!("Bearer {TENANT_TOKEN}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "msg": "success",
            "data": { "items": items, "has_more": false, "page_token": "" }
        })))
        .mount(server)
        .await;
}

/// Mount a record listing split over two pages
pub async fn mount_two_pages(server: &MockServer, first: Vec<Value>, second: Vec<Value>) {
    // Mounted first so the more specific matcher wins
    Mock::given(method("GET"))
        .and(path(records_path()))
        .and(query_param("page_token", "p2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": { "items": second, "has_more": false, "page_token": "" }
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(records_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": { "items": first, "has_more": true, "page_token": "p2" }
        })))
        .mount(server)
        .await;
}

/// Mount the temporary-URL endpoint resolving each token to `/media/<token>`
pub async fn mount_tmp_urls(server: &MockServer, tokens: &[&str]) {
    let urls: Vec<Value> = tokens
        .iter()
        .map(|t| {
            json!({
                "file_token": t,
                "tmp_download_url": format!("{}/media/{t}", server.uri())
            })
        })
        .collect();

    Mock::given(method("GET"))
        .and(path(
            "/open-apis/drive/v1/medias/batch_get_tmp_download_url",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": { "tmp_download_urls": urls }
        })))
        .mount(server)
        .await;
}

/// Serve `body` at `media_path`
pub async fn mount_media(server: &MockServer, media_path: &str, body: &[u8]) {
    Mock::given(method("GET"))
        .and(path(media_path))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
        .mount(server)
        .await;
}

/// Record whose media field is a hyperlink
pub fn link_item(record_id: &str, link: &str, script: Option<&str>) -> Value {
    let mut fields = json!({ "Video": { "link": link, "text": record_id } });
    if let Some(script) = script {
        fields["Script No"] = json!(script);
    }
    json!({ "record_id": record_id, "fields": fields })
}

/// Record whose media field is an attachment list
pub fn attachment_item(record_id: &str, files: &[(&str, &str)], script: Option<&str>) -> Value {
    let files: Vec<Value> = files
        .iter()
        .map(|(token, name)| json!({ "file_token": token, "name": name }))
        .collect();
    let mut fields = json!({ "Video": files });
    if let Some(script) = script {
        fields["Script No"] = json!([{ "type": "text", "text": script }]);
    }
    json!({ "record_id": record_id, "fields": fields })
}

/// Location a task lands in, beneath the download root
pub fn clip_path(temp_dir: &TempDir, file_name: &str) -> PathBuf {
    temp_dir
        .path()
        .join("downloads")
        .join("Clips")
        .join(file_name)
}

/// Poll until `path` exists with exactly `expected` as content
pub async fn wait_for_file(path: &Path, expected: &[u8]) -> bool {
    for _ in 0..200 {
        if let Ok(content) = tokio::fs::read(path).await
            && content == expected
        {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Drain every event currently buffered in `rx`
pub fn drain_events(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
