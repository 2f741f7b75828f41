//! The HTTP image source against an in-process image service.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::get;
use futures::TryStreamExt;
use wharf_common::WharfError;
use wharf_image::{HttpImageSource, ImageManager, ImageServiceConfig, ImageSource};
use wharf_runtime::ContainerRuntime;
use wharf_runtime::testing::FakeRuntime;

fn saved_image() -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    let body = br#"{"busybox":{"latest":"abcd"}}"#;
    let mut header = tar::Header::new_ustar();
    header.set_size(body.len() as u64);
    header.set_mode(0o644);
    header.set_entry_type(tar::EntryType::Regular);
    builder
        .append_data(&mut header, "repositories", &body[..])
        .unwrap();
    builder.into_inner().unwrap()
}

async fn download(Path(id): Path<String>) -> Result<Vec<u8>, StatusCode> {
    if id == "present" {
        Ok(saved_image())
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

async fn serve() -> SocketAddr {
    let app = Router::new().route("/images/{id}/download", get(download));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn source(addr: SocketAddr) -> HttpImageSource {
    let config = ImageServiceConfig::default()
        .with_host(addr.to_string())
        .with_connect_timeout(Duration::from_secs(2))
        .with_timeout(Duration::from_secs(10));
    HttpImageSource::new(&config).unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn downloads_archive() {
    let addr = serve().await;
    let stream = source(addr).fetch("present").await.unwrap();
    let chunks: Vec<bytes::Bytes> = stream.try_collect().await.unwrap();
    let body: Vec<u8> = chunks.concat();
    assert_eq!(body, saved_image());
}

#[tokio::test(flavor = "multi_thread")]
async fn non_200_carries_status_and_url() {
    let addr = serve().await;
    let err = source(addr).fetch("missing").await.err().unwrap();
    match err {
        WharfError::HttpStatus {
            expected,
            actual,
            url,
        } => {
            assert_eq!(expected, 200);
            assert_eq!(actual, 404);
            assert_eq!(url, format!("http://{addr}/images/missing/download"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn import_over_http() {
    let addr = serve().await;
    let runtime = Arc::new(FakeRuntime::new());
    let images = ImageManager::new(
        Arc::clone(&runtime) as Arc<dyn ContainerRuntime>,
        Arc::new(source(addr)) as Arc<dyn ImageSource>,
    );

    let image = images.import("present").await.unwrap();
    assert_eq!(image.id, "present");
    assert!(runtime.inspect_image("present:latest").await.unwrap().is_some());

    let err = images.import("missing").await.unwrap_err();
    assert!(matches!(err, WharfError::HttpStatus { actual: 404, .. }));
}
