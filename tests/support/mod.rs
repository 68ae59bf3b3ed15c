//! Shared fixture: a seeded content directory behind the full router.

#![allow(dead_code)]

use std::num::NonZeroU32;
use std::path::Path;
use std::sync::Arc;

use aperture::application::content::ContentService;
use aperture::application::repos::ContentSource;
use aperture::cache::{
    CacheConfig, CacheServices, Transport, TransportError, TransportRequest, TransportResponse,
};
use aperture::infra::content::FsContentSource;
use aperture::infra::http::{self, AppState};
use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, StatusCode, header};
use bytes::Bytes;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

pub const SECRET: &str = "test-secret";

/// Transport for setups that never reach the network.
pub struct Offline;

#[async_trait]
impl Transport for Offline {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        Err(TransportError(format!("offline: {}", request.url)))
    }
}

pub struct Fixture {
    pub dir: TempDir,
    pub cache: CacheServices,
    pub router: Router,
}

impl Fixture {
    pub fn new(config: CacheConfig, secret: Option<&str>) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        seed(dir.path());

        let transport: Arc<dyn Transport> = Arc::new(Offline);
        let cache = CacheServices::with_parts(&config, transport, Vec::new());
        let source: Arc<dyn ContentSource> = Arc::new(FsContentSource::new(dir.path()));
        let content = Arc::new(ContentService::new(
            Arc::clone(&cache.server),
            source,
            NonZeroU32::new(1).expect("non-zero"),
            3,
        ));
        let state = AppState::new(content, cache.clone(), secret.map(str::to_string));

        Self {
            dir,
            cache,
            router: http::build_router(state),
        }
    }

    pub fn seeded() -> Self {
        Self::new(CacheConfig::default(), Some(SECRET))
    }

    pub fn write(&self, relative: &str, doc: Value) {
        write(self.dir.path(), relative, doc);
    }

    pub async fn send(&self, request: Request<Body>) -> Reply {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router should respond");
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should collect");
        Reply {
            status,
            headers,
            body,
        }
    }

    pub async fn get(&self, uri: &str) -> Reply {
        self.send(get(uri)).await
    }

    pub async fn revalidate(&self, body: Value) -> Reply {
        self.send(post_json(&format!("/api/revalidate?secret={SECRET}"), &body))
            .await
    }
}

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Reply {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("json body")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn x_cache(&self) -> Option<&str> {
        self.header("x-cache")
    }
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build")
}

pub fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build")
}

pub fn write(root: &Path, relative: &str, doc: Value) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    std::fs::write(path, doc.to_string()).expect("write document");
}

fn seed(root: &Path) {
    write(
        root,
        "collections/galleries/iceland.json",
        json!({"title": "Iceland"}),
    );
    write(
        root,
        "collections/galleries/yosemite.json",
        json!({"title": "Yosemite"}),
    );
    write(
        root,
        "collections/images/aurora.json",
        json!({"title": "Aurora", "gallery": {"slug": "iceland"}}),
    );
    write(
        root,
        "collections/images/half-dome.json",
        json!({"title": "Half Dome", "gallery": {"slug": "yosemite"}}),
    );
    write(
        root,
        "collections/blog-posts/first-light.json",
        json!({"title": "First light", "publishedAt": "2025-02-01T06:30:00Z"}),
    );
    write(root, "globals/home.json", json!({"hero": "Granite and ice"}));
    write(root, "globals/settings.json", json!({"siteName": "Aperture"}));
}
