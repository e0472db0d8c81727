use super::*;
use crate::config::RawOptions;
use crate::ico::IconDirectory;
use crate::raster::{EncodeOptions, RasterError, ResizeOptions};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

/// Produces the size followed by the source bytes, so payloads change with
/// the source.
#[derive(Default)]
struct CountingEncoder {
    calls: AtomicUsize,
    failures: AtomicUsize,
}

impl CountingEncoder {
    fn failing(failures: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failures: AtomicUsize::new(failures),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl RasterEncoder for CountingEncoder {
    async fn encode(
        &self,
        source: &SourceImage,
        size: u32,
        _resize: &ResizeOptions,
        _encode: &EncodeOptions,
    ) -> Result<Vec<u8>, RasterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(RasterError::UnsupportedFormat);
        }

        let mut buffer = vec![size as u8];
        buffer.extend_from_slice(source.data());
        Ok(buffer)
    }
}

#[derive(Default)]
struct RecordingChannel {
    updates: Mutex<Vec<FaviconUpdate>>,
}

impl RecordingChannel {
    fn updates(&self) -> Vec<FaviconUpdate> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl UpdateChannel for RecordingChannel {
    async fn send(&self, update: FaviconUpdate) {
        self.updates.lock().unwrap().push(update);
    }
}

struct Fixture {
    dir: TempDir,
    encoder: Arc<CountingEncoder>,
    channel: Arc<RecordingChannel>,
    server: FaviconServer,
}

impl Fixture {
    fn new(options: &str) -> Self {
        Self::with_encoder(options, CountingEncoder::default())
    }

    fn with_encoder(options: &str, encoder: CountingEncoder) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("icon.svg"), "<svg>v1</svg>").unwrap();
        std::fs::write(dir.path().join("other.svg"), "<svg/>").unwrap();

        let options: RawOptions = serde_json::from_str(options).unwrap();
        let config = Arc::new(options.resolve(dir.path()).unwrap());

        let encoder = Arc::new(encoder);
        let channel = Arc::new(RecordingChannel::default());
        let server = FaviconServer::new(config, encoder.clone())
            .with_update_channel(channel.clone());

        Self {
            dir,
            encoder,
            channel,
            server,
        }
    }

    fn source_path(&self) -> PathBuf {
        self.dir.path().join("icon.svg")
    }

    async fn get(&self, url: &str) -> AssetResponse {
        self.server.handle_request(url).await.unwrap().unwrap()
    }
}

#[tokio::test]
async fn concurrent_first_requests_share_one_generation() {
    let fixture = Fixture::new(r#"{ "input": "icon.svg", "sizes": [16, 32] }"#);
    assert!(!fixture.server.is_populated());

    let (first, second) = tokio::join!(fixture.get("/favicon.ico"), fixture.get("/favicon.ico"));

    assert_eq!(fixture.encoder.calls(), 2);
    assert_eq!(first, second);
    assert_eq!(first.content_type, "image/x-icon");
    assert_eq!(first.cache_control, "no-cache");
    assert!(fixture.server.is_populated());
}

#[tokio::test]
async fn every_route_shares_one_generation() {
    let fixture = Fixture::new(
        r#"{ "input": "icon.svg", "sizes": [16, 32, 48], "emitSizes": "both" }"#,
    );

    let (ico, png, single) = tokio::join!(
        fixture.get("/favicon.ico"),
        fixture.get("/favicon-16x16.png"),
        fixture.get("/favicon-32x32.ico"),
    );

    assert_eq!(fixture.encoder.calls(), 3);
    assert_eq!(IconDirectory::parse(&ico.body).unwrap().entries().len(), 3);

    assert_eq!(png.content_type, "image/png");
    assert_eq!(png.body, b"\x10<svg>v1</svg>");

    assert_eq!(single.content_type, "image/x-icon");
    let directory = IconDirectory::parse(&single.body).unwrap();
    assert_eq!(directory.entries().len(), 1);
    assert_eq!(directory.entries()[0].width, 32);
}

#[tokio::test]
async fn start_populates_eagerly() {
    let fixture = Fixture::new(r#"{ "input": "icon.svg", "sizes": [16, 32] }"#);

    fixture.server.start().await.unwrap();
    assert!(fixture.server.is_populated());
    assert_eq!(fixture.encoder.calls(), 2);

    fixture.get("/favicon.ico").await;
    assert_eq!(fixture.encoder.calls(), 2);
}

#[tokio::test]
async fn start_fails_on_generation_error() {
    let fixture = Fixture::with_encoder(
        r#"{ "input": "icon.svg", "sizes": [16] }"#,
        CountingEncoder::failing(1),
    );

    let err = fixture.server.start().await.unwrap_err();
    assert!(err.is_decode());
    assert!(!fixture.server.is_populated());
}

#[tokio::test]
async fn failed_generation_is_retried_by_the_next_request() {
    let fixture = Fixture::with_encoder(
        r#"{ "input": "icon.svg", "sizes": [16] }"#,
        CountingEncoder::failing(1),
    );

    let first = fixture.server.handle_request("/favicon.ico").await.unwrap();
    assert!(first.is_err());
    assert!(!fixture.server.is_populated());

    let second = fixture.get("/favicon.ico").await;
    assert_eq!(IconDirectory::parse(&second.body).unwrap().entries().len(), 1);
    assert_eq!(fixture.encoder.calls(), 2);
}

#[tokio::test]
async fn source_change_regenerates_and_notifies_once() {
    let fixture = Fixture::new(r#"{ "input": "icon.svg", "sizes": [16] }"#);
    fixture.server.start().await.unwrap();
    let before = fixture.get("/favicon.ico").await;
    let old_token = fixture.server.cache_token();

    std::fs::write(fixture.source_path(), "<svg>v2</svg>").unwrap();
    let handled = fixture
        .server
        .on_file_changed(&fixture.source_path())
        .await
        .unwrap();
    assert!(handled);
    assert!(fixture.server.is_populated());
    assert_eq!(fixture.encoder.calls(), 2);

    let new_token = fixture.server.cache_token();
    assert_ne!(old_token, new_token);

    let updates = fixture.channel.updates();
    assert_eq!(
        updates,
        vec![FaviconUpdate {
            event: UPDATE_EVENT,
            payload: UpdatePayload {
                cache_token: new_token
            },
        }]
    );

    let after = fixture.get("/favicon.ico").await;
    assert_ne!(before.body, after.body);
    assert!(after.body.ends_with(b"<svg>v2</svg>"));
}

#[tokio::test]
async fn overlapping_changes_keep_the_latest_source() {
    let fixture = Fixture::new(r#"{ "input": "icon.svg", "sizes": [16] }"#);
    fixture.server.start().await.unwrap();
    let path = fixture.source_path();

    std::fs::write(&path, "<svg>v2</svg>").unwrap();
    let first = fixture.server.on_file_changed(&path);
    let second = async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        std::fs::write(&path, "<svg>v3</svg>").unwrap();
        fixture.server.on_file_changed(&path).await
    };

    let (first, second) = tokio::join!(first, second);
    assert!(first.unwrap());
    assert!(second.unwrap());

    let response = fixture.get("/favicon.ico").await;
    assert!(response.body.ends_with(b"<svg>v3</svg>"));

    let token = fixture.server.cache_token();
    let updates = fixture.channel.updates();
    assert_eq!(updates.len(), 2);
    assert_ne!(updates[0].payload.cache_token, updates[1].payload.cache_token);
    assert!(updates.iter().any(|update| update.payload.cache_token == token));
}

#[tokio::test]
async fn unrelated_changes_are_ignored() {
    let fixture = Fixture::new(r#"{ "input": "icon.svg" }"#);
    fixture.server.start().await.unwrap();
    let token = fixture.server.cache_token();

    let handled = fixture
        .server
        .on_file_changed(&fixture.dir.path().join("other.svg"))
        .await
        .unwrap();

    assert!(!handled);
    assert_eq!(fixture.server.cache_token(), token);
    assert!(fixture.channel.updates().is_empty());
}

#[tokio::test]
async fn hot_update_can_be_disabled() {
    let fixture = Fixture::new(r#"{ "input": "icon.svg", "dev": { "hotUpdate": false } }"#);

    let handled = fixture
        .server
        .on_file_changed(&fixture.source_path())
        .await
        .unwrap();

    assert!(handled);
    assert!(fixture.server.is_populated());
    assert!(fixture.channel.updates().is_empty());
}

#[tokio::test]
async fn unknown_paths_fall_through() {
    let fixture = Fixture::new(r#"{ "input": "icon.svg", "base": "/app/" }"#);

    assert!(fixture.server.handle_request("/main.js").await.is_none());
    assert!(fixture.server.handle_request("/favicon.ico").await.is_none());
    assert!(fixture
        .server
        .handle_request("/app/favicon-16x16.png")
        .await
        .is_none());

    let response = fixture.get("/app/favicon.ico?v=123").await;
    assert_eq!(response.content_type, "image/x-icon");
    assert_eq!(fixture.encoder.calls(), 3);
}

#[tokio::test]
async fn serves_the_source_image() {
    let fixture = Fixture::new(r#"{ "input": "icon.svg", "emitSource": true }"#);

    let response = fixture.get("/icon.svg").await;
    assert_eq!(response.content_type, "image/svg+xml");
    assert_eq!(response.body, b"<svg>v1</svg>");
    assert_eq!(fixture.encoder.calls(), 0);
}

#[tokio::test]
async fn serving_can_be_disabled() {
    let fixture = Fixture::new(r#"{ "input": "icon.svg", "dev": false }"#);
    assert!(fixture.server.handle_request("/favicon.ico").await.is_none());
}

#[tokio::test]
async fn html_is_cache_busted_without_injection() {
    let fixture = Fixture::new(r#"{ "input": "icon.svg" }"#);
    let token = fixture.server.cache_token();

    let transform = fixture
        .server
        .transform_html(r#"<head><link rel="icon" href="/favicon.ico"></head>"#);

    assert!(transform.tags.is_empty());
    assert_eq!(
        transform.text,
        format!(r#"<head><link rel="icon" href="/favicon.ico?v={}"></head>"#, token)
    );
}

#[tokio::test]
async fn html_gets_fresh_tags_with_injection() {
    let fixture = Fixture::new(r#"{ "input": "icon.svg", "inject": true, "emitSource": true }"#);
    let token = fixture.server.cache_token();

    let transform = fixture.server.transform_html(
        r#"<head><link rel="icon" href="/old.ico"><link rel="apple-touch-icon" href="/a.png"></head>"#,
    );

    assert_eq!(
        transform.text,
        r#"<head><link rel="apple-touch-icon" href="/a.png"></head>"#
    );
    assert_eq!(transform.tags.len(), 2);
    assert_eq!(transform.tags[0].href, format!("/favicon.ico?v={}", token));
    assert_eq!(transform.tags[1].href, format!("/icon.svg?v={}", token));
}

#[test]
fn update_payload_serializes_camel_case() {
    let update = FaviconUpdate {
        event: UPDATE_EVENT,
        payload: UpdatePayload {
            cache_token: "abc".to_owned(),
        },
    };

    assert_eq!(
        serde_json::to_string(&update).unwrap(),
        r#"{"event":"favicon:update","payload":{"cacheToken":"abc"}}"#
    );
}
