#![allow(dead_code)]

use jobtrack::auth::create_jwt;
use jobtrack::report::{ImageError, ImageSource, ReportRenderer};
use jobtrack::repo::inmem::InMemRepo;
use jobtrack::storage::{BlobStore, BlobStoreError};
use jobtrack::AppState;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const TEST_SECRET: &str = "test-secret-must-be-32-bytes-long!!";

pub fn ensure_secret() {
    std::env::set_var("JWT_SECRET", TEST_SECRET);
}

pub fn token(subject: &str, name: Option<&str>) -> String {
    ensure_secret();
    create_jwt(subject, name).unwrap()
}

pub fn bearer(subject: &str) -> (&'static str, String) {
    ("Authorization", format!("Bearer {}", token(subject, None)))
}

// In-memory blob store (tests only)
#[derive(Default)]
pub struct MockBlobStore {
    pub inner: Mutex<HashMap<String, (Vec<u8>, String)>>,
}

#[async_trait::async_trait]
impl BlobStore for MockBlobStore {
    async fn put(&self, key: &str, content_type: &str, bytes: Vec<u8>) -> Result<String, BlobStoreError> {
        let mut m = self.inner.lock().unwrap();
        if m.contains_key(key) {
            return Err(BlobStoreError::Exists);
        }
        m.insert(key.to_string(), (bytes, content_type.to_string()));
        Ok(format!("http://blobs.test/{key}"))
    }
}

/// Image source that never produces an image.
pub struct NoImages;

#[async_trait::async_trait]
impl ImageSource for NoImages {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ImageError> {
        Err(ImageError::Fetch(format!("offline: {url}")))
    }
}

pub fn state_with(repo: InMemRepo, blobs: Arc<MockBlobStore>) -> AppState {
    AppState {
        repo: Arc::new(repo),
        blob_store: blobs,
        renderer: Arc::new(ReportRenderer::new(Arc::new(NoImages))),
    }
}

pub fn state() -> AppState {
    state_with(InMemRepo::new(), Arc::new(MockBlobStore::default()))
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([30, 120, 200]));
    let mut buf = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, image::ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

// Helper to build a multipart body with provided bytes and filename
pub fn build_multipart(field: &str, file_name: &str, bytes: &[u8], boundary: &str) -> (String, Vec<u8>) {
    let mut body: Vec<u8> = Vec::new();
    let disp = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
    );
    body.extend_from_slice(disp.as_bytes());
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={boundary}"), body)
}
