use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use mountdav_core::{
    DirectoryListing, ListingCache, ListingKey, MemoryStore, Mount, ObjectStore, PermissionTier,
};
use mountdav_gateway::cache::MokaListingCache;
use mountdav_gateway::registry::{hash_key, ApiKeyRecord, PathPermission};
use mountdav_gateway::upload::strategy::{UploadMode, UploadPolicy};
use mountdav_gateway::{router, AdminCredentials, AppState, GatewaySettings, StaticRegistry};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Listing cache that records every invalidation.
struct RecordingCache {
    inner: MokaListingCache,
    invalidated: Mutex<Vec<String>>,
}

impl RecordingCache {
    fn new() -> Self {
        Self {
            inner: MokaListingCache::new(1000, Duration::from_secs(60)),
            invalidated: Mutex::new(Vec::new()),
        }
    }

    fn invalidated(&self) -> Vec<String> {
        self.invalidated.lock().unwrap().clone()
    }
}

#[async_trait]
impl ListingCache for RecordingCache {
    async fn get(&self, key: &ListingKey) -> Option<DirectoryListing> {
        self.inner.get(key).await
    }

    async fn put(&self, key: ListingKey, listing: DirectoryListing, ttl: Option<Duration>) {
        self.inner.put(key, listing, ttl).await
    }

    async fn invalidate(&self, key: &ListingKey) {
        self.invalidated.lock().unwrap().push(key.prefix.clone());
        self.inner.invalidate(key).await
    }

    async fn invalidate_tree(&self, backend: &str, prefix: &str) {
        self.invalidated
            .lock()
            .unwrap()
            .push(format!("tree:{}", prefix));
        self.inner.invalidate_tree(backend, prefix).await
    }
}

struct Harness {
    app: Router,
    state: AppState,
    store: Arc<MemoryStore>,
    cache: Arc<RecordingCache>,
    admin: String,
}

fn basic(user: &str, pass: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", user, pass)))
}

fn mount(id: &str, mount_path: &str, root_prefix: &str) -> Mount {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "name": id,
        "mount_path": mount_path,
        "backend": "mem",
        "root_prefix": root_prefix,
    }))
    .unwrap()
}

fn test_policy() -> UploadPolicy {
    UploadPolicy {
        small_threshold: 1024,
        large_threshold: 1024 * 1024,
        part_size: 256,
        retry_base_delay: Duration::from_millis(1),
        ..UploadPolicy::default()
    }
}

fn harness_with(policy: UploadPolicy, store: MemoryStore) -> Harness {
    harness_from(
        GatewaySettings {
            upload: policy,
            ..GatewaySettings::default()
        },
        store,
    )
}

fn harness_from(settings: GatewaySettings, store: MemoryStore) -> Harness {
    let store = Arc::new(store);
    let mut stores: HashMap<String, Arc<dyn ObjectStore>> = HashMap::new();
    stores.insert("mem".to_string(), store.clone());

    let reader = ApiKeyRecord {
        id: "key-reader".to_string(),
        name: "reader".to_string(),
        key_sha256: hash_key("mdk_reader"),
        active: true,
        permissions: vec![PathPermission {
            path: "/team/share".to_string(),
            tier: PermissionTier::Read,
        }],
    };
    let registry = StaticRegistry::new(
        vec![
            mount("team", "/team/share", "team"),
            mount("photos", "/photos", "photos"),
        ],
        stores,
        vec![reader],
        AdminCredentials {
            username: Some("admin".to_string()),
            password: Some("pw".to_string()),
            session_tokens: Vec::new(),
        },
    )
    .unwrap();

    let cache = Arc::new(RecordingCache::new());
    let state = AppState::new(settings, Arc::new(registry))
        .unwrap()
        .with_listing_cache(cache.clone());

    Harness {
        app: router(state.clone()),
        state,
        store,
        cache,
        admin: basic("admin", "pw"),
    }
}

fn harness() -> Harness {
    harness_with(
        test_policy(),
        MemoryStore::new("memory://mem").with_min_part_size(256),
    )
}

impl Harness {
    async fn request(
        &self,
        verb: &str,
        uri: &str,
        auth: Option<&str>,
        headers: &[(&str, &str)],
        body: Body,
    ) -> Response<Body> {
        let mut builder = Request::builder().method(verb).uri(uri);
        if let Some(auth) = auth {
            builder = builder.header("authorization", auth);
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap()
    }

    async fn send(&self, verb: &str, uri: &str, headers: &[(&str, &str)]) -> Response<Body> {
        self.request(verb, uri, Some(&self.admin), headers, Body::empty())
            .await
    }

    async fn put(&self, uri: &str, data: Vec<u8>) -> Response<Body> {
        let len = data.len().to_string();
        self.request(
            "PUT",
            uri,
            Some(&self.admin),
            &[("content-length", len.as_str())],
            Body::from(data),
        )
        .await
    }

    async fn seed(&self, key: &str, data: &'static [u8]) {
        self.store
            .put(key, Bytes::from_static(data), None)
            .await
            .unwrap();
    }
}

async fn body_bytes(response: Response<Body>) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}

async fn body_text(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await.to_vec()).unwrap()
}

fn header<'a>(response: &'a Response<Body>, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn test_health() {
    let h = harness();
    let response = h.request("GET", "/health", None, &[], Body::empty()).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(json["healthy"], true);
    assert_eq!(json["mounts"], 2);
    assert_eq!(json["active_uploads"], 0);
    assert_eq!(json["uploads"], serde_json::json!([]));
}

#[tokio::test]
async fn test_missing_credentials_get_challenge() {
    let h = harness();
    let response = h
        .request("PROPFIND", "/dav/", None, &[], Body::empty())
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        header(&response, "www-authenticate"),
        Some(r#"Basic realm="WebDAV", Bearer realm="WebDAV""#)
    );

    let wrong = basic("admin", "nope");
    let response = h
        .request("PROPFIND", "/dav/", Some(&wrong), &[], Body::empty())
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_auth_cache_recognises_returning_client() {
    let h = harness();
    let client = [
        ("user-agent", "Microsoft-WebDAV-MiniRedir/10.0"),
        ("x-forwarded-for", "198.51.100.4"),
        ("depth", "0"),
    ];

    let response = h
        .request("PROPFIND", "/dav/", Some(&h.admin), &client, Body::empty())
        .await;
    assert_eq!(response.status(), StatusCode::MULTI_STATUS);

    let response = h
        .request("PROPFIND", "/dav/", None, &client, Body::empty())
        .await;
    assert_eq!(response.status(), StatusCode::MULTI_STATUS);

    let elsewhere = [
        ("user-agent", "Microsoft-WebDAV-MiniRedir/10.0"),
        ("x-forwarded-for", "203.0.113.9"),
    ];
    let response = h
        .request("PROPFIND", "/dav/", None, &elsewhere, Body::empty())
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_root_lists_virtual_tree() {
    let h = harness();
    let response = h.send("PROPFIND", "/dav/", &[("depth", "1")]).await;
    assert_eq!(response.status(), StatusCode::MULTI_STATUS);
    assert_eq!(header(&response, "x-item-count"), Some("3"));

    let body = body_text(response).await;
    assert!(body.contains("<D:href>/dav/</D:href>"));
    assert!(body.contains("<D:href>/dav/team/</D:href>"));
    assert!(body.contains("<D:href>/dav/photos/</D:href>"));
    // Synthetic directory before the mount
    assert!(body.find("/dav/team/").unwrap() < body.find("/dav/photos/").unwrap());

    let response = h.send("PROPFIND", "/dav/", &[("depth", "0")]).await;
    assert_eq!(header(&response, "x-item-count"), Some("1"));

    let response = h.send("PROPFIND", "/dav/", &[("depth", "2")]).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(header(&response, "content-type")
        .unwrap()
        .starts_with("application/xml"));
}

#[tokio::test]
async fn test_virtual_tree_is_read_only() {
    let h = harness();
    assert_eq!(
        h.put("/dav/team", b"x".to_vec()).await.status(),
        StatusCode::FORBIDDEN
    );
    assert_eq!(
        h.send("MKCOL", "/dav/", &[]).await.status(),
        StatusCode::FORBIDDEN
    );
    assert_eq!(
        h.send("GET", "/dav/team", &[]).await.status(),
        StatusCode::METHOD_NOT_ALLOWED
    );
    assert_eq!(
        h.send("PROPFIND", "/dav/nowhere", &[]).await.status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn test_unknown_verb_and_bad_paths() {
    let h = harness();
    let response = h.send("PATCH", "/dav/photos/a.txt", &[]).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert!(header(&response, "allow").unwrap().contains("PROPFIND"));

    assert_eq!(
        h.send("GET", "/dav/photos/a%2Fb.txt", &[]).await.status(),
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        h.send("GET", "/dav/photos/../team/x", &[]).await.status(),
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        h.send("GET", "/elsewhere/file", &[]).await.status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn test_options() {
    let h = harness();
    let response = h.send("OPTIONS", "/dav/photos/", &[]).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "dav"), Some("1, 2"));
    assert_eq!(header(&response, "ms-author-via"), Some("DAV"));
    assert_eq!(header(&response, "accept-ranges"), Some("bytes"));
    assert!(header(&response, "allow").unwrap().contains("MKCOL"));
}

#[tokio::test]
async fn test_put_get_round_trip_across_thresholds() {
    let h = harness();
    for size in [0usize, 1, 1023, 1024, 1025, 5000] {
        let uri = format!("/dav/photos/size-{}.bin", size);
        let data = payload(size);

        let response = h.put(&uri, data.clone()).await;
        assert_eq!(response.status(), StatusCode::CREATED, "PUT of {} bytes", size);

        let response = h.send("GET", &uri, &[]).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await.to_vec(), data, "GET of {} bytes", size);

        let response = h.send("HEAD", &uri, &[]).await;
        assert_eq!(response.status(), StatusCode::OK);
        let expected_len = size.to_string();
        assert_eq!(header(&response, "content-length"), Some(expected_len.as_str()));
    }

    assert_eq!(h.store.pending_uploads(), 0);
    assert_eq!(h.state.uploads.active(), 0);
}

#[tokio::test]
async fn test_put_without_length_uses_multipart() {
    let h = harness();
    let data = payload(700);
    let response = h
        .request(
            "PUT",
            "/dav/photos/chunked.bin",
            Some(&h.admin),
            &[],
            Body::from(data.clone()),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let stored = h.store.head("photos/chunked.bin").await.unwrap();
    assert_eq!(stored.size, 700);
    // Multipart ETags carry the part count
    assert!(stored.etag.unwrap().ends_with("-3\""));
}

#[tokio::test]
async fn test_put_with_impossible_expected_length() {
    let h = harness();
    let response = h
        .request(
            "PUT",
            "/dav/photos/liar.bin",
            Some(&h.admin),
            &[("x-expected-entity-length", "18446744073709551615")],
            Body::from("hello"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(!h.store.keys().contains(&"photos/liar.bin".to_string()));
    assert_eq!(h.store.pending_uploads(), 0);
}

#[tokio::test]
async fn test_put_rejects_collections() {
    let h = harness();
    assert_eq!(
        h.put("/dav/photos", b"x".to_vec()).await.status(),
        StatusCode::METHOD_NOT_ALLOWED
    );
    assert_eq!(
        h.put("/dav/photos/dir/", b"x".to_vec()).await.status(),
        StatusCode::METHOD_NOT_ALLOWED
    );
}

#[tokio::test]
async fn test_proxy_upload_streams_to_presigned_url() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/photos/big.bin"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness_with(
        UploadPolicy {
            mode: UploadMode::Proxy,
            ..test_policy()
        },
        MemoryStore::new("memory://mem").with_presign_endpoint(server.uri()),
    );
    let response = h.put("/dav/photos/big.bin", payload(2000)).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].body.len(), 2000);
}

#[tokio::test]
async fn test_proxy_rejection_is_bad_gateway() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let h = harness_with(
        UploadPolicy {
            mode: UploadMode::Proxy,
            ..test_policy()
        },
        MemoryStore::new("memory://mem").with_presign_endpoint(server.uri()),
    );
    let response = h.put("/dav/photos/big.bin", payload(2000)).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_forced_proxy_without_presign_support() {
    let h = harness_with(
        UploadPolicy {
            mode: UploadMode::Proxy,
            ..test_policy()
        },
        MemoryStore::new("memory://mem"),
    );
    let response = h.put("/dav/photos/big.bin", payload(2000)).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_mkcol_is_idempotent_and_creates_parents() {
    let h = harness();
    for _ in 0..3 {
        assert_eq!(
            h.send("MKCOL", "/dav/photos/albums", &[]).await.status(),
            StatusCode::CREATED
        );
    }
    assert_eq!(
        h.send("MKCOL", "/dav/photos/trips/2024", &[]).await.status(),
        StatusCode::CREATED
    );
    let keys = h.store.keys();
    assert!(keys.contains(&"photos/albums/".to_string()));
    assert!(keys.contains(&"photos/trips/".to_string()));
    assert!(keys.contains(&"photos/trips/2024/".to_string()));

    assert_eq!(
        h.send("MKCOL", "/dav/photos", &[]).await.status(),
        StatusCode::CREATED
    );

    h.seed("photos/file.txt", b"x").await;
    assert_eq!(
        h.send("MKCOL", "/dav/photos/file.txt", &[]).await.status(),
        StatusCode::METHOD_NOT_ALLOWED
    );

    let response = h
        .request(
            "MKCOL",
            "/dav/photos/with-body",
            Some(&h.admin),
            &[],
            Body::from("<x/>"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn test_conditional_get() {
    let h = harness();
    h.seed("photos/c.txt", b"conditional").await;

    let response = h.send("GET", "/dav/photos/c.txt", &[]).await;
    let etag = header(&response, "etag").unwrap().to_string();

    let response = h
        .send("GET", "/dav/photos/c.txt", &[("if-none-match", etag.as_str())])
        .await;
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    assert!(body_bytes(response).await.is_empty());

    let response = h
        .send("GET", "/dav/photos/c.txt", &[("if-match", "\"something-else\"")])
        .await;
    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);

    let response = h
        .send("GET", "/dav/photos/c.txt", &[("if-match", etag.as_str())])
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_range_requests() {
    let h = harness();
    let data = payload(100);
    h.store
        .put("photos/r.bin", Bytes::from(data.clone()), None)
        .await
        .unwrap();

    let response = h
        .send("GET", "/dav/photos/r.bin", &[("range", "bytes=10-19")])
        .await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header(&response, "content-range"), Some("bytes 10-19/100"));
    assert_eq!(body_bytes(response).await.to_vec(), data[10..20].to_vec());

    let response = h
        .send("GET", "/dav/photos/r.bin", &[("range", "bytes=95-200")])
        .await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header(&response, "content-range"), Some("bytes 95-99/100"));
    assert_eq!(body_bytes(response).await.len(), 5);

    let response = h
        .send("GET", "/dav/photos/r.bin", &[("range", "bytes=200-300")])
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await.len(), 100);
}

#[tokio::test]
async fn test_get_missing_and_collections() {
    let h = harness();
    h.seed("photos/dir/inner.txt", b"x").await;
    assert_eq!(
        h.send("GET", "/dav/photos/none.txt", &[]).await.status(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        h.send("GET", "/dav/photos/dir", &[]).await.status(),
        StatusCode::METHOD_NOT_ALLOWED
    );
    assert_eq!(
        h.send("GET", "/dav/photos", &[]).await.status(),
        StatusCode::METHOD_NOT_ALLOWED
    );
}

#[tokio::test]
async fn test_move_and_overwrite() {
    let h = harness();
    h.seed("photos/a/f.txt", b"first").await;

    let response = h
        .send(
            "MOVE",
            "/dav/photos/a/f.txt",
            &[("destination", "http://localhost/dav/photos/a/g.txt")],
        )
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        h.send("GET", "/dav/photos/a/f.txt", &[]).await.status(),
        StatusCode::NOT_FOUND
    );
    let response = h.send("GET", "/dav/photos/a/g.txt", &[]).await;
    assert_eq!(&body_bytes(response).await[..], b"first");

    h.seed("photos/a/f.txt", b"second").await;
    let response = h
        .send(
            "MOVE",
            "/dav/photos/a/f.txt",
            &[
                ("destination", "/dav/photos/a/g.txt"),
                ("overwrite", "F"),
            ],
        )
        .await;
    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
    let f = body_bytes(h.send("GET", "/dav/photos/a/f.txt", &[]).await).await;
    let g = body_bytes(h.send("GET", "/dav/photos/a/g.txt", &[]).await).await;
    assert_eq!(&f[..], b"second");
    assert_eq!(&g[..], b"first");

    let response = h
        .send("MOVE", "/dav/photos/a/f.txt", &[("destination", "/dav/photos/a/g.txt")])
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let g = body_bytes(h.send("GET", "/dav/photos/a/g.txt", &[]).await).await;
    assert_eq!(&g[..], b"second");
}

#[tokio::test]
async fn test_copy_directory() {
    let h = harness();
    h.seed("photos/src/", b"").await;
    h.seed("photos/src/one.txt", b"1").await;
    h.seed("photos/src/nested/two.txt", b"2").await;

    let response = h
        .send("COPY", "/dav/photos/src/", &[("destination", "/dav/photos/backup/copy")])
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let keys = h.store.keys();
    for key in [
        "photos/backup/",
        "photos/backup/copy/",
        "photos/backup/copy/one.txt",
        "photos/backup/copy/nested/two.txt",
        "photos/src/one.txt",
    ] {
        assert!(keys.contains(&key.to_string()), "missing {}", key);
    }

    let response = h
        .send("COPY", "/dav/photos/src/", &[("destination", "/dav/photos/backup/copy")])
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_move_rejections() {
    let h = harness();
    h.seed("photos/f.txt", b"x").await;

    let response = h.send("MOVE", "/dav/photos/f.txt", &[]).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = h
        .send("MOVE", "/dav/photos/f.txt", &[("destination", "/dav/team/share/f.txt")])
        .await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let response = h
        .send("MOVE", "/dav/photos/f.txt", &[("destination", "/dav/photos/f.txt")])
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = h
        .send("MOVE", "/dav/photos/f.txt", &[("destination", "/dav/team/f.txt")])
        .await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let response = h
        .send("MOVE", "/dav/photos/f.txt", &[("destination", "/dav/team")])
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_delete() {
    let h = harness();
    h.seed("photos/gone.txt", b"x").await;
    h.seed("photos/dir/", b"").await;
    h.seed("photos/dir/a.txt", b"a").await;
    h.seed("photos/dir/sub/b.txt", b"b").await;

    let response = h.send("DELETE", "/dav/photos", &[]).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert!(header(&response, "allow").is_some());

    assert_eq!(
        h.send("DELETE", "/dav/photos/gone.txt", &[]).await.status(),
        StatusCode::NO_CONTENT
    );
    assert_eq!(
        h.send("DELETE", "/dav/photos/gone.txt", &[]).await.status(),
        StatusCode::NOT_FOUND
    );

    // No trailing slash: still removed as a directory
    assert_eq!(
        h.send("DELETE", "/dav/photos/dir", &[]).await.status(),
        StatusCode::NO_CONTENT
    );
    assert!(h.store.keys().iter().all(|k| !k.starts_with("photos/dir/")));
    assert!(h.cache.invalidated().contains(&"tree:photos/dir/".to_string()));
}

#[tokio::test]
async fn test_propfind_item_cap() {
    let h = harness();
    for i in 0..15 {
        h.store
            .put(&format!("photos/album/f{:02}.jpg", i), Bytes::from_static(b"x"), None)
            .await
            .unwrap();
    }

    let response = h
        .send(
            "PROPFIND",
            "/dav/photos/album/",
            &[("depth", "1"), ("x-max-items", "10")],
        )
        .await;
    assert_eq!(response.status(), StatusCode::MULTI_STATUS);
    assert_eq!(header(&response, "x-item-count"), Some("10"));
    assert_eq!(header(&response, "x-truncated"), Some("true"));
    let body = body_text(response).await;
    assert_eq!(body.matches("<D:response>").count(), 11);
    assert!(body.contains("HTTP/1.1 507 Insufficient Storage"));

    let response = h
        .send("PROPFIND", "/dav/photos/album/", &[("depth", "1")])
        .await;
    assert_eq!(header(&response, "x-item-count"), Some("16"));
    assert!(header(&response, "x-truncated").is_none());
    let body = body_text(response).await;
    assert!(!body.contains("Insufficient Storage"));
    assert!(body.contains("<D:getcontenttype>image/jpeg</D:getcontenttype>"));
}

#[tokio::test]
async fn test_propfind_page_ceiling() {
    let h = harness_from(
        GatewaySettings {
            upload: test_policy(),
            propfind_page_size: 2,
            propfind_page_ceiling: 2,
            ..GatewaySettings::default()
        },
        MemoryStore::new("memory://mem").with_min_part_size(256),
    );
    for i in 0..15 {
        h.store
            .put(&format!("photos/album/f{:02}.jpg", i), Bytes::from_static(b"x"), None)
            .await
            .unwrap();
    }

    // Far under the item cap, but two pages of two keys cannot cover the album
    let response = h
        .send("PROPFIND", "/dav/photos/album/", &[("depth", "1")])
        .await;
    assert_eq!(response.status(), StatusCode::MULTI_STATUS);
    assert_eq!(header(&response, "x-item-count"), Some("5"));
    assert_eq!(header(&response, "x-truncated"), Some("true"));
    let body = body_text(response).await;
    assert_eq!(body.matches("<D:response>").count(), 6);
    assert!(body.contains("HTTP/1.1 507 Insufficient Storage"));
    assert!(body.contains("/dav/photos/album/f03.jpg"));
    assert!(!body.contains("/dav/photos/album/f04.jpg"));

    // A directory that fits in the page budget is listed whole
    h.seed("photos/small/a.txt", b"a").await;
    h.seed("photos/small/b.txt", b"b").await;
    let response = h
        .send("PROPFIND", "/dav/photos/small/", &[("depth", "1")])
        .await;
    assert_eq!(header(&response, "x-item-count"), Some("3"));
    assert!(header(&response, "x-truncated").is_none());
}

#[tokio::test]
async fn test_propfind_entries() {
    let h = harness();
    h.seed("photos/docs/my file.txt", b"hello").await;
    h.seed("photos/docs/sub/x", b"x").await;

    let response = h.send("PROPFIND", "/dav/photos/docs", &[("depth", "1")]).await;
    assert_eq!(response.status(), StatusCode::MULTI_STATUS);
    let body = body_text(response).await;
    assert!(body.contains("<D:href>/dav/photos/docs/</D:href>"));
    assert!(body.contains("<D:href>/dav/photos/docs/my%20file.txt</D:href>"));
    assert!(body.contains("<D:href>/dav/photos/docs/sub/</D:href>"));
    assert!(body.contains("<D:getcontentlength>5</D:getcontentlength>"));
    assert!(body.contains("<D:displayname>my file.txt</D:displayname>"));

    let response = h
        .send("PROPFIND", "/dav/photos/docs/my%20file.txt", &[("depth", "1")])
        .await;
    assert_eq!(header(&response, "x-item-count"), Some("1"));

    let response = h.send("PROPFIND", "/dav/photos/missing", &[]).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_writes_invalidate_listings() {
    let h = harness();
    h.seed("photos/old.txt", b"x").await;

    let body = body_text(h.send("PROPFIND", "/dav/photos/", &[("depth", "1")]).await).await;
    assert!(body.contains("old.txt"));
    assert!(!body.contains("new.txt"));

    assert_eq!(
        h.put("/dav/photos/new.txt", b"new".to_vec()).await.status(),
        StatusCode::CREATED
    );
    assert!(h.cache.invalidated().contains(&"photos/".to_string()));

    let body = body_text(h.send("PROPFIND", "/dav/photos/", &[("depth", "1")]).await).await;
    assert!(body.contains("new.txt"));
}

#[tokio::test]
async fn test_deep_write_refreshes_ancestor_listings() {
    let h = harness();
    h.seed("photos/old.txt", b"x").await;

    let body = body_text(h.send("PROPFIND", "/dav/photos/", &[("depth", "1")]).await).await;
    assert!(!body.contains("newdir"));

    assert_eq!(
        h.put("/dav/photos/newdir/sub/f.txt", b"deep".to_vec()).await.status(),
        StatusCode::CREATED
    );

    let body = body_text(h.send("PROPFIND", "/dav/photos/", &[("depth", "1")]).await).await;
    assert!(body.contains("<D:href>/dav/photos/newdir/</D:href>"));
    assert!(h.cache.invalidated().contains(&"photos/".to_string()));
}

#[tokio::test]
async fn test_api_key_permissions() {
    let h = harness();
    h.seed("team/readme.txt", b"hi").await;
    let auth = Some("Bearer mdk_reader");

    let response = h
        .request("PROPFIND", "/dav/", auth, &[("depth", "1")], Body::empty())
        .await;
    assert_eq!(response.status(), StatusCode::MULTI_STATUS);
    let body = body_text(response).await;
    assert!(body.contains("/dav/team/"));
    assert!(!body.contains("/dav/photos/"));

    let response = h
        .request("GET", "/dav/team/share/readme.txt", auth, &[], Body::empty())
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = h
        .request(
            "PUT",
            "/dav/team/share/new.txt",
            auth,
            &[("content-length", "1")],
            Body::from("x"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = h
        .request("GET", "/dav/photos/anything", auth, &[], Body::empty())
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Same key as Basic credentials
    let as_basic = basic("mdk_reader", "mdk_reader");
    let response = h
        .request("GET", "/dav/team/share/readme.txt", Some(&as_basic), &[], Body::empty())
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_lock_unlock_proppatch() {
    let h = harness();
    h.seed("photos/doc.txt", b"x").await;

    let lock_body = r#"<?xml version="1.0"?><D:lockinfo xmlns:D="DAV:"><D:lockscope><D:exclusive/></D:lockscope><D:locktype><D:write/></D:locktype><D:owner><D:href>mailto:someone@example.com</D:href></D:owner></D:lockinfo>"#;
    let response = h
        .request(
            "LOCK",
            "/dav/photos/doc.txt",
            Some(&h.admin),
            &[("timeout", "Second-600")],
            Body::from(lock_body),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(header(&response, "lock-token")
        .unwrap()
        .starts_with("<opaquelocktoken:"));
    let body = body_text(response).await;
    assert!(body.contains("<D:timeout>Second-600</D:timeout>"));
    assert!(body.contains("mailto:someone@example.com"));

    let response = h.send("UNLOCK", "/dav/photos/doc.txt", &[]).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(response).await.contains("<D:error"));

    let response = h
        .send(
            "UNLOCK",
            "/dav/photos/doc.txt",
            &[("lock-token", "<opaquelocktoken:whatever>")],
        )
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    assert_eq!(
        h.send("LOCK", "/dav/team", &[]).await.status(),
        StatusCode::FORBIDDEN
    );

    let response = h.send("PROPPATCH", "/dav/photos/doc.txt", &[]).await;
    assert_eq!(response.status(), StatusCode::MULTI_STATUS);
    assert!(body_text(response).await.contains("HTTP/1.1 200 OK"));
}
