// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use spool_core::attr::Attribute;

#[test]
fn request_roundtrips_through_frame() {
    let request = Request::new(Operation::PrintJob, "alice")
        .with_attr("job-name", Attribute::name("report"))
        .with_attr("copies", Attribute::Integer(2))
        .with_document(b"Hello".to_vec());

    let framed = encode(&request).unwrap();
    let back: Request = decode(&framed).unwrap();
    assert_eq!(back, request);
    assert_eq!(back.document.as_deref(), Some(b"Hello".as_slice()));
}

#[test]
fn document_is_base64_on_the_wire() {
    let request = Request::new(Operation::PrintJob, "alice").with_document(b"Hello".to_vec());
    let json = serde_json::to_value(&request).unwrap();
    assert_eq!(json["document"], "SGVsbG8=");
}

#[test]
fn frame_prefix_is_big_endian_length() {
    let request = Request::new(Operation::GetDefault, "alice");
    let framed = encode(&request).unwrap();
    let len = u32::from_be_bytes([framed[0], framed[1], framed[2], framed[3]]) as usize;
    assert_eq!(len, framed.len() - 4);
}

#[test]
fn oversize_frame_is_rejected_on_decode() {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&(MAX_FRAME as u32 + 1).to_be_bytes());
    let err = decode::<Request>(&bytes).unwrap_err();
    assert!(matches!(err, ProtocolError::FrameTooLarge(_)));
}

#[test]
fn response_always_carries_the_header_group() {
    let response = Response::ok();
    let header = response.group(GroupTag::Operation).unwrap();
    assert_eq!(header.get("attributes-charset").and_then(Attribute::as_str), Some("utf-8"));
    assert_eq!(
        header.get("attributes-natural-language").and_then(Attribute::as_str),
        Some("en")
    );
}

#[test]
fn error_response_carries_messages() {
    let response = Response::error(StatusCode::NotFound, "no such destination")
        .with_detail("the destination \"laserjet\" is not known to this server");
    assert!(response.status.is_error());
    assert_eq!(response.message.as_deref(), Some("no such destination"));
    assert!(response.detail.as_deref().unwrap_or("").contains("laserjet"));
}

#[test]
fn groups_tagged_returns_every_match() {
    let mut response = Response::ok();
    for id in 1..=3i64 {
        let mut attrs = spool_core::AttrBag::new();
        attrs.insert("job-id".to_string(), Attribute::Integer(id));
        response.push_group(GroupTag::Job, attrs);
    }
    let ids: Vec<i64> = response
        .groups_tagged(GroupTag::Job)
        .filter_map(|g| g.get("job-id").and_then(Attribute::as_integer))
        .collect();
    assert_eq!(ids, vec![1, 2, 3]);
}

#[tokio::test]
async fn read_write_message_over_duplex() {
    let (mut client, mut server) = tokio::io::duplex(1024);
    let request = Request::new(Operation::CancelJob, "bob")
        .with_attr("job-id", Attribute::Integer(9));

    write_message(&mut client, &request).await.unwrap();
    let received: Request = read_message(&mut server).await.unwrap();
    assert_eq!(received, request);

    let response = Response::ok();
    write_message(&mut server, &response).await.unwrap();
    let got: Response = read_message(&mut client).await.unwrap();
    assert_eq!(got, response);
}

#[tokio::test]
async fn eof_reads_as_connection_closed() {
    let (client, mut server) = tokio::io::duplex(64);
    drop(client);
    let err = read_message::<_, Request>(&mut server).await.unwrap_err();
    assert!(matches!(err, ProtocolError::ConnectionClosed));
}

#[tokio::test]
async fn read_request_times_out() {
    let (_client, mut server) = tokio::io::duplex(64);
    let err = read_request(&mut server, std::time::Duration::from_millis(10))
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::Timeout));
}

#[test]
fn operation_display_names() {
    assert_eq!(Operation::PrintJob.to_string(), "print-job");
    assert_eq!(Operation::GetPrinterAttributes.to_string(), "get-printer-attributes");
    assert!(Operation::AddPrinter.is_admin());
    assert!(!Operation::PrintJob.is_admin());
}

#[test]
fn status_code_serde_is_kebab() {
    let json = serde_json::to_value(StatusCode::DocumentFormatNotSupported).unwrap();
    assert_eq!(json, "document-format-not-supported");
}
