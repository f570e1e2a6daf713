mod common;

use actix_web::{test, web, App};
use jobtrack::config;
use jobtrack::routes::{UploadResponse, UPLOAD_SIZE_LIMIT};
use jobtrack::repo::inmem::InMemRepo;
use serial_test::serial;
use std::sync::Arc;

use common::{bearer, build_multipart, png, state_with, MockBlobStore};

#[actix_web::test]
#[serial]
async fn upload_stores_under_job_requests_prefix() {
    let blobs = Arc::new(MockBlobStore::default());
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state_with(InMemRepo::new(), blobs.clone())))
            .configure(config),
    )
    .await;

    let bytes = png(4, 3);
    let (ct, body) = build_multipart("file", "bracket.png", &bytes, "BOUNDARY123");
    let req = test::TestRequest::post()
        .uri("/api/v1/job-requests/upload")
        .insert_header(bearer("user_1"))
        .insert_header(("Content-Type", ct))
        .set_payload(body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let out: UploadResponse = serde_json::from_slice(&test::read_body(resp).await).unwrap();

    assert_eq!(out.filename, "bracket.png");
    assert!(out.path.starts_with("job-requests/"));
    assert!(out.path.ends_with(".png"));
    assert_eq!(out.url, format!("http://blobs.test/{}", out.path));

    let stored = blobs.inner.lock().unwrap();
    let (saved, content_type) = stored.get(&out.path).expect("object stored");
    assert_eq!(saved, &bytes);
    // declared octet-stream is replaced by the sniffed type
    assert_eq!(content_type, "image/png");
}

#[actix_web::test]
#[serial]
async fn upload_without_file_field_is_bad_request() {
    let app = test::init_service(App::new().app_data(web::Data::new(common::state())).configure(config)).await;

    let (ct, body) = build_multipart("attachment", "x.png", b"data", "B0UND");
    let req = test::TestRequest::post()
        .uri("/api/v1/job-requests/upload")
        .insert_header(bearer("user_1"))
        .insert_header(("Content-Type", ct))
        .set_payload(body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let v: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(v["error"], "No file provided");

    let (ct, body) = build_multipart("file", "empty.png", b"", "B0UND");
    let req = test::TestRequest::post()
        .uri("/api/v1/job-requests/upload")
        .insert_header(bearer("user_1"))
        .insert_header(("Content-Type", ct))
        .set_payload(body)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);
}

#[actix_web::test]
#[serial]
async fn upload_over_limit_is_rejected() {
    let blobs = Arc::new(MockBlobStore::default());
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state_with(InMemRepo::new(), blobs.clone())))
            .configure(config),
    )
    .await;

    let big = vec![7u8; UPLOAD_SIZE_LIMIT + 1];
    let (ct, body) = build_multipart("file", "huge.bin", &big, "BIGB");
    let req = test::TestRequest::post()
        .uri("/api/v1/job-requests/upload")
        .insert_header(bearer("user_1"))
        .insert_header(("Content-Type", ct))
        .set_payload(body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 413);
    assert!(blobs.inner.lock().unwrap().is_empty());
}
