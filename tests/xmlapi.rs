mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{create_bucket, put_object, send, send_json, test_app, xml_tag, PUBLIC_HOST};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;

#[tokio::test]
async fn path_style_put_and_get() {
    let (app, publisher) = test_app();
    create_bucket(&app, "some-bucket", false).await;

    let req = Request::builder()
        .method("PUT")
        .uri("/some-bucket/files/txt/text-01.txt")
        .header("host", PUBLIC_HOST)
        .header("content-type", "text/plain")
        .body(Body::from("something"))
        .unwrap();
    let (status, headers, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["etag"], "\"Q3uTDbhLgHnC3YBKcZNrXw==\"");
    assert_eq!(publisher.event_types(), vec!["OBJECT_FINALIZE"]);

    let req = Request::builder()
        .uri("/some-bucket/files/txt/text-01.txt")
        .header("host", PUBLIC_HOST)
        .body(Body::empty())
        .unwrap();
    let (status, headers, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"something");
    assert_eq!(headers["accept-ranges"], "bytes");
    assert_eq!(headers["content-length"], "9");
    assert_eq!(headers["etag"], "\"Q3uTDbhLgHnC3YBKcZNrXw==\"");
    assert_eq!(headers["access-control-allow-origin"], "*");
    assert_eq!(headers["x-goog-stored-content-encoding"], "identity");
    assert!(headers.contains_key("x-goog-generation"));
    assert!(headers["x-goog-hash"]
        .to_str()
        .unwrap()
        .contains("md5=Q3uTDbhLgHnC3YBKcZNrXw=="));

    // Missing object carries a NoSuchKey XML error.
    let req = Request::builder()
        .uri("/some-bucket/missing.txt")
        .header("host", PUBLIC_HOST)
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(String::from_utf8_lossy(&body).contains("<Code>NoSuchKey</Code>"));
}

#[tokio::test]
async fn virtual_host_and_cname_styles() {
    let (app, _) = test_app();
    create_bucket(&app, "some-bucket", false).await;
    put_object(&app, "some-bucket", "files/txt/text-01.txt", b"something").await;

    // Virtual-host style.
    let req = Request::builder()
        .uri("/files/txt/text-01.txt")
        .header("host", format!("some-bucket.{}", PUBLIC_HOST))
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"something");

    // CNAME style: the Host IS the bucket name.
    let req = Request::builder()
        .uri("/files/txt/text-01.txt")
        .header("host", "some-bucket")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"something");

    // HEAD keeps headers and drops the body.
    let req = Request::builder()
        .method("HEAD")
        .uri("/files/txt/text-01.txt")
        .header("host", format!("some-bucket.{}", PUBLIC_HOST))
        .body(Body::empty())
        .unwrap();
    let (status, headers, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["content-length"], "9");
    assert!(body.is_empty());
}

#[tokio::test]
async fn range_requests() {
    let (app, _) = test_app();
    create_bucket(&app, "bkt", false).await;
    let content: Vec<u8> = (0..40u8).map(|i| b'a' + (i % 26)).collect();
    put_object(&app, "bkt", "ranged", &content).await;

    let get_with_range = |range: &'static str| {
        Request::builder()
            .uri("/bkt/ranged")
            .header("host", PUBLIC_HOST)
            .header("range", range)
            .body(Body::empty())
            .unwrap()
    };

    // Open-ended: 206 with the full range.
    let (status, headers, body) = send(&app, get_with_range("bytes=0-")).await;
    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(headers["content-range"], "bytes 0-39/40");
    assert_eq!(body.len(), 40);

    // End clamped.
    let (status, headers, body) = send(&app, get_with_range("bytes=0-100")).await;
    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(headers["content-range"], "bytes 0-39/40");
    assert_eq!(&body[..], &content[..]);

    // Start past the end: 416 with an InvalidRange XML body.
    let (status, _, body) = send(&app, get_with_range("bytes=50-60")).await;
    assert_eq!(status, StatusCode::RANGE_NOT_SATISFIABLE);
    let text = String::from_utf8_lossy(&body);
    assert!(text.contains("<Code>InvalidRange</Code>"));
    assert!(text.contains("bytes=50-60"));

    // Inverted range: whole content, 200.
    let (status, _, body) = send(&app, get_with_range("bytes=30-20")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.len(), 40);

    // Suffix range.
    let (status, headers, body) = send(&app, get_with_range("bytes=-5")).await;
    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(headers["content-range"], "bytes 35-39/40");
    assert_eq!(&body[..], &content[35..]);

    // Interior range.
    let (status, headers, body) = send(&app, get_with_range("bytes=2-7")).await;
    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(headers["content-range"], "bytes 2-7/40");
    assert_eq!(&body[..], &content[2..8]);
}

fn gzip_bytes(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

#[tokio::test]
async fn gzip_transcoding() {
    let (app, _) = test_app();
    create_bucket(&app, "bkt", false).await;

    let plain = b"uncompressed payload for transcoding";
    let compressed = gzip_bytes(plain);

    // Store gzip content with contentEncoding via a multipart upload.
    let mut body = Vec::new();
    body.extend_from_slice(
        b"--sep\r\nContent-Type: application/json\r\n\r\n{\"name\": \"zipped.txt\", \"contentType\": \"text/plain\", \"contentEncoding\": \"gzip\"}\r\n--sep\r\nContent-Type: text/plain\r\n\r\n",
    );
    body.extend_from_slice(&compressed);
    body.extend_from_slice(b"\r\n--sep--\r\n");
    let req = Request::builder()
        .method("POST")
        .uri("/upload/storage/v1/b/bkt/o?uploadType=multipart")
        .header("content-type", "multipart/related; boundary=sep")
        .body(Body::from(body))
        .unwrap();
    let (status, doc) = send_json(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(doc["contentEncoding"], "gzip");

    // No Accept-Encoding: the emulator decompresses and hides the encoding.
    let req = Request::builder()
        .uri("/bkt/zipped.txt")
        .header("host", PUBLIC_HOST)
        .body(Body::empty())
        .unwrap();
    let (status, headers, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], plain);
    assert_eq!(headers["content-length"], plain.len().to_string().as_str());
    assert!(headers.get("content-encoding").is_none());
    assert_eq!(headers["x-goog-stored-content-encoding"], "gzip");

    // Range is ignored while transcoding.
    let req = Request::builder()
        .uri("/bkt/zipped.txt")
        .header("host", PUBLIC_HOST)
        .header("range", "bytes=0-3")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], plain);

    // A gzip-accepting client gets the stored bytes untouched.
    let req = Request::builder()
        .uri("/bkt/zipped.txt")
        .header("host", PUBLIC_HOST)
        .header("accept-encoding", "gzip, deflate")
        .body(Body::empty())
        .unwrap();
    let (status, headers, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], &compressed[..]);
    assert_eq!(headers["content-encoding"], "gzip");
}

#[tokio::test]
async fn request_body_gzip_is_decompressed() {
    let (app, _) = test_app();
    create_bucket(&app, "bkt", false).await;

    let req = Request::builder()
        .method("PUT")
        .uri("/bkt/inflated.txt")
        .header("host", PUBLIC_HOST)
        .header("content-encoding", "gzip")
        .body(Body::from(gzip_bytes(b"inflate me")))
        .unwrap();
    let (status, _, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);

    let req = Request::builder()
        .uri("/bkt/inflated.txt")
        .header("host", PUBLIC_HOST)
        .body(Body::empty())
        .unwrap();
    let (_, _, body) = send(&app, req).await;
    assert_eq!(&body[..], b"inflate me");
}

#[tokio::test]
async fn xml_object_listing() {
    let (app, _) = test_app();
    create_bucket(&app, "bkt", false).await;
    for name in ["files/txt/a.txt", "files/txt/b.txt", "files/top.txt", "zzz.txt"] {
        put_object(&app, "bkt", name, b"x").await;
    }

    let req = Request::builder()
        .uri("/bkt?prefix=files/&delimiter=/")
        .header("host", PUBLIC_HOST)
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    let xml = String::from_utf8_lossy(&body).into_owned();
    assert!(xml.contains("<ListBucketResult>"));
    assert_eq!(xml_tag(&xml, "Name").unwrap(), "bkt");
    assert_eq!(xml_tag(&xml, "KeyCount").unwrap(), "1");
    assert!(xml.contains("<Key>files/top.txt</Key>"));
    assert!(xml.contains("<Prefix>files/txt/</Prefix>"));

    // start-after is an exclusive offset.
    let req = Request::builder()
        .uri("/bkt?start-after=files/txt/a.txt")
        .header("host", PUBLIC_HOST)
        .body(Body::empty())
        .unwrap();
    let (_, _, body) = send(&app, req).await;
    let xml = String::from_utf8_lossy(&body).into_owned();
    assert!(!xml.contains("<Key>files/txt/a.txt</Key>"));
    assert!(xml.contains("<Key>files/txt/b.txt</Key>"));
    assert!(xml.contains("<Key>zzz.txt</Key>"));

    // Listing a missing bucket produces NoSuchBucket.
    let req = Request::builder()
        .uri("/gone")
        .header("host", PUBLIC_HOST)
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(String::from_utf8_lossy(&body).contains("<Code>NoSuchBucket</Code>"));
}

#[tokio::test]
async fn xml_multipart_upload_flow() {
    let (app, publisher) = test_app();
    create_bucket(&app, "test-bucket", false).await;

    // Initiate.
    let req = Request::builder()
        .method("POST")
        .uri("/test-bucket/object.txt?uploads")
        .header("host", PUBLIC_HOST)
        .header("x-goog-meta-origin", "multipart")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    let xml = String::from_utf8_lossy(&body).into_owned();
    assert_eq!(xml_tag(&xml, "Bucket").unwrap(), "test-bucket");
    assert_eq!(xml_tag(&xml, "Key").unwrap(), "object.txt");
    let upload_id = xml_tag(&xml, "UploadId").unwrap();

    // Upload part 1.
    let req = Request::builder()
        .method("PUT")
        .uri(format!(
            "/test-bucket/object.txt?uploadId={}&partNumber=1",
            upload_id
        ))
        .header("host", PUBLIC_HOST)
        .body(Body::from("my content"))
        .unwrap();
    let (status, headers, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    let part_etag = headers["etag"].to_str().unwrap().to_string();
    assert!(headers["x-goog-hash"].to_str().unwrap().contains("crc32c="));

    // List parts.
    let req = Request::builder()
        .uri(format!("/test-bucket/object.txt?uploadId={}", upload_id))
        .header("host", PUBLIC_HOST)
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    let xml = String::from_utf8_lossy(&body).into_owned();
    assert!(xml.contains("<ListPartsResult>"));
    assert_eq!(xml_tag(&xml, "PartNumber").unwrap(), "1");
    assert_eq!(xml_tag(&xml, "IsTruncated").unwrap(), "false");

    // Complete with a wildcard etag.
    let complete = r#"<CompleteMultipartUpload><Part><PartNumber>1</PartNumber><ETag>*</ETag></Part></CompleteMultipartUpload>"#;
    let req = Request::builder()
        .method("POST")
        .uri(format!("/test-bucket/object.txt?uploadId={}", upload_id))
        .header("host", PUBLIC_HOST)
        .body(Body::from(complete))
        .unwrap();
    let (status, _, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    let xml = String::from_utf8_lossy(&body).into_owned();
    assert!(xml.contains("<CompleteMultipartUploadResult>"));
    assert_eq!(xml_tag(&xml, "Bucket").unwrap(), "test-bucket");
    assert_eq!(xml_tag(&xml, "Key").unwrap(), "object.txt");
    assert_eq!(format!("\"{}\"", xml_tag(&xml, "ETag").unwrap().trim_matches('"')), part_etag);
    assert!(publisher
        .event_types()
        .contains(&"OBJECT_FINALIZE".to_string()));

    // The object exists with the captured metadata.
    let req = Request::builder()
        .uri("/test-bucket/object.txt")
        .header("host", PUBLIC_HOST)
        .body(Body::empty())
        .unwrap();
    let (status, headers, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"my content");
    assert_eq!(headers["x-goog-meta-origin"], "multipart");

    // Upload state is gone.
    let req = Request::builder()
        .method("DELETE")
        .uri(format!("/test-bucket/object.txt?uploadId={}", upload_id))
        .header("host", PUBLIC_HOST)
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn xml_multipart_validation() {
    let (app, _) = test_app();
    create_bucket(&app, "bkt", false).await;

    let req = Request::builder()
        .method("POST")
        .uri("/bkt/obj?uploads")
        .header("host", PUBLIC_HOST)
        .body(Body::empty())
        .unwrap();
    let (_, _, body) = send(&app, req).await;
    let upload_id = xml_tag(&String::from_utf8_lossy(&body), "UploadId").unwrap();

    // Part number bounds.
    let req = Request::builder()
        .method("PUT")
        .uri(format!("/bkt/obj?uploadId={}&partNumber=0", upload_id))
        .header("host", PUBLIC_HOST)
        .body(Body::from("x"))
        .unwrap();
    let (status, _, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Content-MD5 mismatch.
    let req = Request::builder()
        .method("PUT")
        .uri(format!("/bkt/obj?uploadId={}&partNumber=1", upload_id))
        .header("host", PUBLIC_HOST)
        .header("content-md5", "bm90LXRoZS1yaWdodC1oYXNoAA==")
        .body(Body::from("data"))
        .unwrap();
    let (status, _, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Correct crc32c in X-Goog-Hash is accepted.
    let req = Request::builder()
        .method("PUT")
        .uri(format!("/bkt/obj?uploadId={}&partNumber=1", upload_id))
        .header("host", PUBLIC_HOST)
        .header("x-goog-hash", "crc32c=yZRlqg==")
        .body(Body::from("hello world"))
        .unwrap();
    let (status, _, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);

    // Wrong crc32c is rejected.
    let req = Request::builder()
        .method("PUT")
        .uri(format!("/bkt/obj?uploadId={}&partNumber=2", upload_id))
        .header("host", PUBLIC_HOST)
        .header("x-goog-hash", "crc32c=AAAAAA==")
        .body(Body::from("hello world"))
        .unwrap();
    let (status, _, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Completing against an unknown upload 404s.
    let req = Request::builder()
        .method("POST")
        .uri("/bkt/obj?uploadId=bogus")
        .header("host", PUBLIC_HOST)
        .body(Body::from(
            r#"<CompleteMultipartUpload><Part><PartNumber>1</PartNumber><ETag>*</ETag></Part></CompleteMultipartUpload>"#,
        ))
        .unwrap();
    let (status, _, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(String::from_utf8_lossy(&body).contains("NoSuchUpload"));

    // Abort frees the state.
    let req = Request::builder()
        .method("DELETE")
        .uri(format!("/bkt/obj?uploadId={}", upload_id))
        .header("host", PUBLIC_HOST)
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn xml_multipart_listings() {
    let (app, _) = test_app();
    create_bucket(&app, "bkt", false).await;

    for key in ["b-key", "a-key", "dir/nested"] {
        let req = Request::builder()
            .method("POST")
            .uri(format!("/bkt/{}?uploads", key))
            .header("host", PUBLIC_HOST)
            .body(Body::empty())
            .unwrap();
        let (status, _, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
    }

    let req = Request::builder()
        .uri("/bkt?uploads")
        .header("host", PUBLIC_HOST)
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    let xml = String::from_utf8_lossy(&body).into_owned();
    assert!(xml.contains("<ListMultipartUploadsResult>"));
    let a = xml.find("<Key>a-key</Key>").unwrap();
    let b = xml.find("<Key>b-key</Key>").unwrap();
    assert!(a < b, "uploads must sort by key");

    // max-uploads truncates and reports markers.
    let req = Request::builder()
        .uri("/bkt?uploads&max-uploads=1")
        .header("host", PUBLIC_HOST)
        .body(Body::empty())
        .unwrap();
    let (_, _, body) = send(&app, req).await;
    let xml = String::from_utf8_lossy(&body).into_owned();
    assert_eq!(xml_tag(&xml, "IsTruncated").unwrap(), "true");
    assert_eq!(xml_tag(&xml, "NextKeyMarker").unwrap(), "a-key");

    // Delimiter rolls nested keys into CommonPrefixes.
    let req = Request::builder()
        .uri("/bkt?uploads&delimiter=/")
        .header("host", PUBLIC_HOST)
        .body(Body::empty())
        .unwrap();
    let (_, _, body) = send(&app, req).await;
    let xml = String::from_utf8_lossy(&body).into_owned();
    assert!(xml.contains("<Prefix>dir/</Prefix>"));
    assert!(!xml.contains("<Key>dir/nested</Key>"));
}

#[tokio::test]
async fn xml_copy_object() {
    let (app, _) = test_app();
    create_bucket(&app, "bkt", false).await;
    put_object(&app, "bkt", "src.txt", b"copy via xml").await;

    let req = Request::builder()
        .method("PUT")
        .uri("/bkt/dst.txt")
        .header("host", PUBLIC_HOST)
        .header("x-goog-copy-source", "/bkt/src.txt")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    let xml = String::from_utf8_lossy(&body).into_owned();
    assert!(xml.contains("<CopyObjectResult>"));
    assert!(xml_tag(&xml, "ETag").is_some());

    let req = Request::builder()
        .uri("/bkt/dst.txt")
        .header("host", PUBLIC_HOST)
        .body(Body::empty())
        .unwrap();
    let (_, _, body) = send(&app, req).await;
    assert_eq!(&body[..], b"copy via xml");
}

#[tokio::test]
async fn xml_metadata_and_delete() {
    let (app, _) = test_app();
    create_bucket(&app, "bkt", false).await;

    let req = Request::builder()
        .method("PUT")
        .uri("/bkt/tagged.txt")
        .header("host", PUBLIC_HOST)
        .header("x-goog-meta-marco", "polo")
        .body(Body::from("x"))
        .unwrap();
    let (status, _, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);

    // Header-derived keys are canonicalized.
    let req = Request::builder()
        .uri("/storage/v1/b/bkt/o/tagged.txt")
        .body(Body::empty())
        .unwrap();
    let (_, doc) = send_json(&app, req).await;
    assert_eq!(doc["metadata"]["Marco"], "polo");

    let req = Request::builder()
        .method("DELETE")
        .uri("/bkt/tagged.txt")
        .header("host", PUBLIC_HOST)
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let req = Request::builder()
        .method("DELETE")
        .uri("/bkt/tagged.txt")
        .header("host", PUBLIC_HOST)
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn head_bucket_and_xml_bucket_lifecycle() {
    let (app, _) = test_app();

    // XML PUT creates the bucket.
    let req = Request::builder()
        .method("PUT")
        .uri("/fresh-bucket")
        .header("host", PUBLIC_HOST)
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);

    let req = Request::builder()
        .method("HEAD")
        .uri("/fresh-bucket")
        .header("host", PUBLIC_HOST)
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);

    let req = Request::builder()
        .method("HEAD")
        .uri("/missing-bucket")
        .header("host", PUBLIC_HOST)
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let req = Request::builder()
        .method("DELETE")
        .uri("/fresh-bucket")
        .header("host", PUBLIC_HOST)
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn form_data_upload() {
    let (app, _) = test_app();
    create_bucket(&app, "bkt", false).await;

    let body = "--fd\r\nContent-Disposition: form-data; name=\"key\"\r\n\r\nform/upload.txt\r\n--fd\r\nContent-Disposition: form-data; name=\"x-goog-meta-source\"\r\n\r\nbrowser\r\n--fd\r\nContent-Disposition: form-data; name=\"success_action_status\"\r\n\r\n201\r\n--fd\r\nContent-Disposition: form-data; name=\"file\"; filename=\"upload.txt\"\r\nContent-Type: text/plain\r\n\r\nform body\r\n--fd--\r\n";
    let req = Request::builder()
        .method("POST")
        .uri("/bkt")
        .header("host", PUBLIC_HOST)
        .header("content-type", "multipart/form-data; boundary=fd")
        .body(Body::from(body))
        .unwrap();
    let (status, _, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::CREATED);

    let req = Request::builder()
        .uri("/bkt/form/upload.txt")
        .header("host", PUBLIC_HOST)
        .body(Body::empty())
        .unwrap();
    let (status, headers, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"form body");
    assert_eq!(headers["x-goog-meta-source"], "browser");
    assert_eq!(headers["content-type"], "text/plain");
}
