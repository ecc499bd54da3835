use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{xml_escape, Error, Result};
use crate::models::{rfc3339, ObjectAttrs};
use crate::multipart::{Part, UploadSummary};

const XML_HEADER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

/// `CompleteMultipartUpload` request body.
#[derive(Debug, Deserialize)]
pub struct CompleteMultipartUpload {
    #[serde(rename = "Part", default)]
    pub parts: Vec<CompletePart>,
}

#[derive(Debug, Deserialize)]
pub struct CompletePart {
    #[serde(rename = "PartNumber")]
    pub part_number: i32,
    #[serde(rename = "ETag")]
    pub etag: String,
}

pub fn parse_complete_multipart(body: &str) -> Result<CompleteMultipartUpload> {
    serde_xml_rs::from_str(body)
        .map_err(|_| Error::invalid("malformed CompleteMultipartUpload body"))
}

pub fn list_bucket_result(
    bucket: &str,
    objects: &[ObjectAttrs],
    prefixes: &[String],
    prefix: &str,
    delimiter: &str,
) -> String {
    let mut xml = String::from(XML_HEADER);
    xml.push_str("\n<ListBucketResult>");
    xml.push_str(&format!("\n  <Name>{}</Name>", xml_escape(bucket)));
    xml.push_str(&format!("\n  <Prefix>{}</Prefix>", xml_escape(prefix)));
    if !delimiter.is_empty() {
        xml.push_str(&format!("\n  <Delimiter>{}</Delimiter>", xml_escape(delimiter)));
    }
    xml.push_str(&format!("\n  <KeyCount>{}</KeyCount>", objects.len()));

    for object in objects {
        xml.push_str("\n  <Contents>");
        xml.push_str(&format!("\n    <Key>{}</Key>", xml_escape(&object.name)));
        xml.push_str(&format!(
            "\n    <Generation>{}</Generation>",
            object.generation
        ));
        xml.push_str(&format!(
            "\n    <LastModified>{}</LastModified>",
            rfc3339(&object.updated)
        ));
        xml.push_str(&format!("\n    <ETag>\"{}\"</ETag>", object.etag));
        xml.push_str(&format!("\n    <Size>{}</Size>", object.size));
        xml.push_str(&format!(
            "\n    <StorageClass>{}</StorageClass>",
            xml_escape(&object.storage_class)
        ));
        xml.push_str("\n  </Contents>");
    }

    for prefix in prefixes {
        xml.push_str("\n  <CommonPrefixes>");
        xml.push_str(&format!("\n    <Prefix>{}</Prefix>", xml_escape(prefix)));
        xml.push_str("\n  </CommonPrefixes>");
    }

    xml.push_str("\n</ListBucketResult>");
    xml
}

pub fn initiate_multipart_result(bucket: &str, key: &str, upload_id: &str) -> String {
    let mut xml = String::from(XML_HEADER);
    xml.push_str("\n<InitiateMultipartUploadResult>");
    xml.push_str(&format!("\n  <Bucket>{}</Bucket>", xml_escape(bucket)));
    xml.push_str(&format!("\n  <Key>{}</Key>", xml_escape(key)));
    xml.push_str(&format!("\n  <UploadId>{}</UploadId>", xml_escape(upload_id)));
    xml.push_str("\n</InitiateMultipartUploadResult>");
    xml
}

pub fn complete_multipart_result(location: &str, bucket: &str, key: &str, etag: &str) -> String {
    let mut xml = String::from(XML_HEADER);
    xml.push_str("\n<CompleteMultipartUploadResult>");
    xml.push_str(&format!("\n  <Location>{}</Location>", xml_escape(location)));
    xml.push_str(&format!("\n  <Bucket>{}</Bucket>", xml_escape(bucket)));
    xml.push_str(&format!("\n  <Key>{}</Key>", xml_escape(key)));
    xml.push_str(&format!("\n  <ETag>\"{}\"</ETag>", etag));
    xml.push_str("\n</CompleteMultipartUploadResult>");
    xml
}

pub fn copy_object_result(etag: &str, last_modified: &DateTime<Utc>) -> String {
    let mut xml = String::from(XML_HEADER);
    xml.push_str("\n<CopyObjectResult>");
    xml.push_str(&format!("\n  <ETag>\"{}\"</ETag>", etag));
    xml.push_str(&format!(
        "\n  <LastModified>{}</LastModified>",
        rfc3339(last_modified)
    ));
    xml.push_str("\n</CopyObjectResult>");
    xml
}

pub struct ListPartsPage<'a> {
    pub bucket: &'a str,
    pub key: &'a str,
    pub upload_id: &'a str,
    pub parts: &'a [Part],
    pub max_parts: i32,
    pub part_number_marker: i32,
    pub next_part_number_marker: Option<i32>,
    pub is_truncated: bool,
}

pub fn list_parts_result(page: &ListPartsPage<'_>) -> String {
    let mut xml = String::from(XML_HEADER);
    xml.push_str("\n<ListPartsResult>");
    xml.push_str(&format!("\n  <Bucket>{}</Bucket>", xml_escape(page.bucket)));
    xml.push_str(&format!("\n  <Key>{}</Key>", xml_escape(page.key)));
    xml.push_str(&format!(
        "\n  <UploadId>{}</UploadId>",
        xml_escape(page.upload_id)
    ));
    if page.part_number_marker > 0 {
        xml.push_str(&format!(
            "\n  <PartNumberMarker>{}</PartNumberMarker>",
            page.part_number_marker
        ));
    }
    if let Some(marker) = page.next_part_number_marker {
        xml.push_str(&format!(
            "\n  <NextPartNumberMarker>{}</NextPartNumberMarker>",
            marker
        ));
    }
    xml.push_str(&format!("\n  <MaxParts>{}</MaxParts>", page.max_parts));
    xml.push_str(&format!(
        "\n  <IsTruncated>{}</IsTruncated>",
        page.is_truncated
    ));

    for part in page.parts {
        xml.push_str("\n  <Part>");
        xml.push_str(&format!(
            "\n    <PartNumber>{}</PartNumber>",
            part.part_number
        ));
        xml.push_str(&format!(
            "\n    <LastModified>{}</LastModified>",
            rfc3339(&part.last_modified)
        ));
        xml.push_str(&format!("\n    <ETag>\"{}\"</ETag>", part.etag));
        xml.push_str(&format!("\n    <Size>{}</Size>", part.size));
        xml.push_str("\n  </Part>");
    }

    xml.push_str("\n</ListPartsResult>");
    xml
}

pub struct ListUploadsPage<'a> {
    pub bucket: &'a str,
    pub uploads: &'a [UploadSummary],
    pub common_prefixes: &'a [String],
    pub prefix: &'a str,
    pub delimiter: &'a str,
    pub key_marker: &'a str,
    pub upload_id_marker: &'a str,
    pub max_uploads: i64,
    pub next_key_marker: Option<&'a str>,
    pub next_upload_id_marker: Option<&'a str>,
    pub is_truncated: bool,
}

pub fn list_uploads_result(page: &ListUploadsPage<'_>) -> String {
    let mut xml = String::from(XML_HEADER);
    xml.push_str("\n<ListMultipartUploadsResult>");
    xml.push_str(&format!("\n  <Bucket>{}</Bucket>", xml_escape(page.bucket)));
    if !page.key_marker.is_empty() {
        xml.push_str(&format!(
            "\n  <KeyMarker>{}</KeyMarker>",
            xml_escape(page.key_marker)
        ));
    }
    if !page.upload_id_marker.is_empty() {
        xml.push_str(&format!(
            "\n  <UploadIdMarker>{}</UploadIdMarker>",
            xml_escape(page.upload_id_marker)
        ));
    }
    if let Some(marker) = page.next_key_marker {
        xml.push_str(&format!(
            "\n  <NextKeyMarker>{}</NextKeyMarker>",
            xml_escape(marker)
        ));
    }
    if let Some(marker) = page.next_upload_id_marker {
        xml.push_str(&format!(
            "\n  <NextUploadIdMarker>{}</NextUploadIdMarker>",
            xml_escape(marker)
        ));
    }
    if !page.prefix.is_empty() {
        xml.push_str(&format!("\n  <Prefix>{}</Prefix>", xml_escape(page.prefix)));
    }
    if !page.delimiter.is_empty() {
        xml.push_str(&format!(
            "\n  <Delimiter>{}</Delimiter>",
            xml_escape(page.delimiter)
        ));
    }
    xml.push_str(&format!("\n  <MaxUploads>{}</MaxUploads>", page.max_uploads));
    xml.push_str(&format!(
        "\n  <IsTruncated>{}</IsTruncated>",
        page.is_truncated
    ));

    for upload in page.uploads {
        xml.push_str("\n  <Upload>");
        xml.push_str(&format!("\n    <Key>{}</Key>", xml_escape(&upload.key)));
        xml.push_str(&format!(
            "\n    <UploadId>{}</UploadId>",
            xml_escape(&upload.upload_id)
        ));
        xml.push_str(&format!(
            "\n    <Initiated>{}</Initiated>",
            rfc3339(&upload.initiated)
        ));
        xml.push_str("\n  </Upload>");
    }

    for prefix in page.common_prefixes {
        xml.push_str("\n  <CommonPrefixes>");
        xml.push_str(&format!("\n    <Prefix>{}</Prefix>", xml_escape(prefix)));
        xml.push_str("\n  </CommonPrefixes>");
    }

    xml.push_str("\n</ListMultipartUploadsResult>");
    xml
}
