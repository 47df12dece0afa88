use crate::storage::paths::DocId;
use crate::tests::spawn_server;
use reqwest::StatusCode;
use serde_json::{json, Value};

async fn create_bucket(server: &crate::tests::TestServer, name: &str) {
    let response = reqwest::Client::new()
        .post(server.url("/api/buckets"))
        .json(&json!({ "name": name }))
        .send()
        .await
        .expect("create bucket");
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn pdf_upload_round_trip() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();
    create_bucket(&server, "invoices").await;

    let body: &[u8] = b"%PDF-1.4\nsome minimal pdf content";
    let response = client
        .put(server.url("/api/buckets/invoices/objects/report.pdf"))
        .body(body.to_vec())
        .send()
        .await
        .expect("upload");
    assert_eq!(response.status(), StatusCode::CREATED);
    let payload: Value = response.json().await.expect("json");
    assert_eq!(payload["detectedContentType"], "application/pdf");
    assert_eq!(payload["detectedExtension"], "pdf");
    assert_eq!(payload["isMismatch"], false);
    assert_eq!(payload["sizeBytes"], body.len() as i64);

    // The blob sits exactly where the DocId says it should.
    let doc_id = DocId::parse(payload["docId"].as_str().expect("docId")).expect("parse doc id");
    let blob_path = server.state.engine.paths().blob_path(&doc_id, "pdf");
    let on_disk = tokio::fs::read(&blob_path).await.expect("blob file");
    assert_eq!(on_disk, body);

    let download = client
        .get(server.url(payload["downloadUrl"].as_str().expect("url")))
        .send()
        .await
        .expect("download");
    assert_eq!(download.status(), StatusCode::OK);
    assert_eq!(
        download
            .headers()
            .get("content-type")
            .and_then(|value| value.to_str().ok()),
        Some("application/pdf")
    );
    let etag = download
        .headers()
        .get("etag")
        .and_then(|value| value.to_str().ok())
        .expect("etag")
        .to_string();
    assert_eq!(etag.trim_matches('"'), payload["sha256"].as_str().expect("sha"));
    assert_eq!(download.bytes().await.expect("body"), body);
}

#[tokio::test]
async fn dangerous_mismatch_downloads_as_attachment() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();
    create_bucket(&server, "invoices").await;

    let response = client
        .put(server.url("/api/buckets/invoices/objects/x.pdf"))
        .header("X-Claimed-Content-Type", "application/pdf")
        .body(vec![0x4D, 0x5A, 0x90, 0x00, 0x03, 0x00, 0x00, 0x00])
        .send()
        .await
        .expect("upload");
    assert_eq!(response.status(), StatusCode::CREATED);
    let payload: Value = response.json().await.expect("json");
    assert_eq!(payload["detectedContentType"], "application/x-msdownload");
    assert_eq!(payload["isMismatch"], true);
    assert_eq!(payload["isDangerousMismatch"], true);

    let download = client
        .get(server.url(payload["downloadUrl"].as_str().expect("url")))
        .send()
        .await
        .expect("download");
    let disposition = download
        .headers()
        .get("content-disposition")
        .and_then(|value| value.to_str().ok())
        .expect("disposition");
    assert!(disposition.starts_with("attachment"));
}

#[tokio::test]
async fn duplicate_name_conflicts_with_envelope() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();
    create_bucket(&server, "invoices").await;

    let first = client
        .put(server.url("/api/buckets/invoices/objects/dup.txt"))
        .body("first")
        .send()
        .await
        .expect("upload");
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = client
        .put(server.url("/api/buckets/invoices/objects/dup.txt"))
        .body("second")
        .send()
        .await
        .expect("upload");
    assert_eq!(second.status(), StatusCode::CONFLICT);
    let request_id_header = second
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .expect("request id header")
        .to_string();
    let payload: Value = second.json().await.expect("json");
    assert_eq!(payload["error"]["code"], "ObjectAlreadyExists");
    assert_eq!(
        payload["error"]["requestId"].as_str().expect("request id"),
        request_id_header
    );
}

#[tokio::test]
async fn bucket_validation_rejections() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();
    for name in ["Invalid-Bucket", "192.168.1.1", "bucket-s3alias"] {
        let response = client
            .post(server.url("/api/buckets"))
            .json(&json!({ "name": name }))
            .send()
            .await
            .expect("create");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{name}");
        let payload: Value = response.json().await.expect("json");
        assert_eq!(payload["error"]["code"], "InvalidBucketName");
    }
}

#[tokio::test]
async fn bucket_lifecycle_over_http() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();
    create_bucket(&server, "cycle-bucket").await;

    // Create conflicts, ensure does not.
    let conflict = client
        .post(server.url("/api/buckets"))
        .json(&json!({ "name": "cycle-bucket" }))
        .send()
        .await
        .expect("conflict");
    assert_eq!(conflict.status(), StatusCode::CONFLICT);
    let ensured = client
        .put(server.url("/api/buckets/cycle-bucket"))
        .send()
        .await
        .expect("ensure");
    assert_eq!(ensured.status(), StatusCode::OK);

    client
        .put(server.url("/api/buckets/cycle-bucket/objects/a.txt"))
        .body("payload")
        .send()
        .await
        .expect("upload");

    let fetched: Value = client
        .get(server.url("/api/buckets/cycle-bucket"))
        .send()
        .await
        .expect("get")
        .json()
        .await
        .expect("json");
    assert_eq!(fetched["objectCount"], 1);
    assert_eq!(fetched["totalSizeBytes"], 7);

    let not_empty = client
        .delete(server.url("/api/buckets/cycle-bucket"))
        .send()
        .await
        .expect("delete");
    assert_eq!(not_empty.status(), StatusCode::CONFLICT);

    let gone = client
        .delete(server.url("/api/buckets/cycle-bucket/objects/by-name/a.txt"))
        .send()
        .await
        .expect("delete object");
    assert_eq!(gone.status(), StatusCode::NO_CONTENT);

    let deleted = client
        .delete(server.url("/api/buckets/cycle-bucket"))
        .send()
        .await
        .expect("delete bucket");
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);
    let missing = client
        .get(server.url("/api/buckets/cycle-bucket"))
        .send()
        .await
        .expect("get");
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn nested_keys_work_by_name_and_listing_pages() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();
    create_bucket(&server, "archive").await;

    for key in ["logs/2020/a.txt", "logs/2020/b.txt", "misc/c.txt"] {
        let response = client
            .put(server.url(&format!("/api/buckets/archive/objects/{key}")))
            .body(format!("content of {key}"))
            .send()
            .await
            .expect("upload");
        assert_eq!(response.status(), StatusCode::CREATED, "{key}");
    }

    let listed: Value = client
        .get(server.url("/api/buckets/archive/objects?prefix=logs/&pageSize=1&page=2"))
        .send()
        .await
        .expect("list")
        .json()
        .await
        .expect("json");
    assert_eq!(listed["totalCount"], 2);
    assert_eq!(listed["page"], 2);
    assert_eq!(listed["pageSize"], 1);
    assert_eq!(listed["items"].as_array().expect("items").len(), 1);
    assert_eq!(listed["items"][0]["filename"], "logs/2020/b.txt");

    let download = client
        .get(server.url("/api/buckets/archive/objects/by-name/logs/2020/a.txt"))
        .send()
        .await
        .expect("download");
    assert_eq!(download.status(), StatusCode::OK);
    assert_eq!(
        download.text().await.expect("body"),
        "content of logs/2020/a.txt"
    );

    let head = client
        .head(server.url("/api/buckets/archive/objects/by-name/logs/2020/a.txt"))
        .send()
        .await
        .expect("head");
    assert_eq!(head.status(), StatusCode::OK);
    assert_eq!(
        head.headers()
            .get("content-length")
            .and_then(|value| value.to_str().ok()),
        Some("26")
    );
    assert!(head.bytes().await.expect("body").is_empty());
}

#[tokio::test]
async fn percent_encoded_keys_decode_exactly_once() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();
    create_bucket(&server, "archive").await;

    // %2F decodes to a path separator before validation.
    let response = client
        .put(server.url("/api/buckets/archive/objects/dir%2Ffile.txt"))
        .body("nested")
        .send()
        .await
        .expect("upload");
    assert_eq!(response.status(), StatusCode::CREATED);
    let payload: Value = response.json().await.expect("json");
    assert_eq!(payload["filename"], "dir/file.txt");

    // %20 decodes to a space, which the key rules reject.
    let rejected = client
        .put(server.url("/api/buckets/archive/objects/bad%20name.txt"))
        .body("data")
        .send()
        .await
        .expect("upload");
    assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);
    let payload: Value = rejected.json().await.expect("json");
    assert_eq!(payload["error"]["code"], "InvalidFilename");
}

#[tokio::test]
async fn cross_bucket_routes_resolve_doc_ids() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();
    create_bucket(&server, "invoices").await;

    let payload: Value = client
        .put(server.url("/api/buckets/invoices/objects/global.txt"))
        .body("anywhere")
        .send()
        .await
        .expect("upload")
        .json()
        .await
        .expect("json");
    let doc_id = payload["docId"].as_str().expect("doc id");

    let download = client
        .get(server.url(&format!("/api/objects/{doc_id}")))
        .send()
        .await
        .expect("download");
    assert_eq!(download.status(), StatusCode::OK);
    assert_eq!(download.text().await.expect("body"), "anywhere");

    let deleted = client
        .delete(server.url(&format!("/api/objects/{doc_id}")))
        .send()
        .await
        .expect("delete");
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    let missing = client
        .get(server.url(&format!("/api/objects/{doc_id}")))
        .send()
        .await
        .expect("get");
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    let payload: Value = missing.json().await.expect("json");
    assert_eq!(payload["error"]["code"], "ObjectNotFound");
}

#[tokio::test]
async fn multipart_form_uses_first_file_part() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();
    create_bucket(&server, "forms").await;

    let form = reqwest::multipart::Form::new()
        .text("comment", "not a file")
        .part(
            "file",
            reqwest::multipart::Part::bytes(b"%PDF-1.4 form upload".to_vec())
                .file_name("upload.pdf")
                .mime_str("application/pdf")
                .expect("mime"),
        );
    let response = client
        .post(server.url("/api/buckets/forms/objects/form"))
        .multipart(form)
        .send()
        .await
        .expect("upload");
    assert_eq!(response.status(), StatusCode::CREATED);
    let payload: Value = response.json().await.expect("json");
    assert_eq!(payload["filename"], "upload.pdf");
    assert_eq!(payload["detectedContentType"], "application/pdf");
    assert_eq!(payload["claimedContentType"], "application/pdf");

    let empty_form = reqwest::multipart::Form::new().text("comment", "still not a file");
    let rejected = client
        .post(server.url("/api/buckets/forms/objects/form"))
        .multipart(empty_form)
        .send()
        .await
        .expect("upload");
    assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);
    let payload: Value = rejected.json().await.expect("json");
    assert_eq!(payload["error"]["code"], "InvalidContentType");
}

#[tokio::test]
async fn oversized_upload_reports_file_too_large() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();
    create_bucket(&server, "limits").await;

    // The test config caps uploads at 4096 bytes.
    let response = client
        .put(server.url("/api/buckets/limits/objects/big.bin"))
        .body(vec![0u8; 8192])
        .send()
        .await
        .expect("upload");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let payload: Value = response.json().await.expect("json");
    assert_eq!(payload["error"]["code"], "FileTooLarge");
}
