//! Integration tests for the object-store stream adapter over an in-memory store

use keystream_cloud::{CloudBackend, ObjectBackend, ObjectStream};
use keystream_core::{
    CastKind, ContentSniffer, Stream, StreamConfig, StreamError, StreamMode, SEEK_CUR, SEEK_END,
    SEEK_SET,
};
use keystream_testing::assertions::{
    assert_content_type, assert_object_eq, assert_object_missing,
};
use keystream_testing::fixtures::{
    memory_backend, put_object, seeded_backend, sniffing_config, PDF_DOCUMENT, PNG_HEADER,
    TEST_CONTENT,
};
use keystream_testing::helpers::{read_remaining, read_stream, write_stream};
use keystream_testing::init_tracing;
use object_store::memory::InMemory;
use std::sync::Arc;

fn mode(raw: &str) -> StreamMode {
    StreamMode::parse(raw).unwrap()
}

fn stream(backend: &Arc<CloudBackend>, key: &str) -> ObjectStream {
    ObjectStream::new(backend.clone(), key, StreamConfig::default()).unwrap()
}

#[test]
fn test_write_then_read_round_trip() {
    init_tracing();
    let backend = memory_backend().unwrap();

    let mut writer = stream(&backend, "notes/hello.txt");
    write_stream(&mut writer, "w", b"Hello, object store!").unwrap();

    let mut reader = stream(&backend, "notes/hello.txt");
    assert_eq!(read_stream(&mut reader).unwrap(), b"Hello, object store!");
}

#[test]
fn test_construction_registers_backend() {
    let backend = Arc::new(CloudBackend::new(Arc::new(InMemory::new())));
    assert!(!backend.is_registered());

    let _stream = stream(&backend, "anything");
    assert!(backend.is_registered());
}

#[test]
fn test_seek_from_start_and_current() {
    let backend = seeded_backend(&[("seek.txt", TEST_CONTENT)]).unwrap();
    let mut reader = stream(&backend, "seek.txt");
    assert!(reader.open(mode("r")).unwrap());
    assert!(!reader.is_seekable());

    assert!(reader.seek(1, SEEK_SET).unwrap());
    assert!(reader.is_seekable());
    assert_eq!(reader.tell().unwrap(), Some(1));

    assert!(reader.seek(1, SEEK_CUR).unwrap());
    assert_eq!(reader.tell().unwrap(), Some(2));
    assert_eq!(reader.read(2).unwrap().unwrap(), b"st");
    assert!(reader.close().unwrap());
}

#[test]
fn test_seek_from_end_on_fresh_handle() {
    let backend = seeded_backend(&[("seek.txt", TEST_CONTENT)]).unwrap();
    let mut reader = stream(&backend, "seek.txt");
    assert!(reader.open(mode("r")).unwrap());

    assert!(reader.seek(-2, SEEK_END).unwrap());
    assert_eq!(reader.tell().unwrap(), Some(10));
    assert_eq!(reader.read(100).unwrap().unwrap(), b"nt");
    assert!(reader.eof());
}

#[test]
fn test_seek_upgrade_keeps_read_position() {
    let backend = seeded_backend(&[("seek.txt", TEST_CONTENT)]).unwrap();
    let mut reader = stream(&backend, "seek.txt");
    assert!(reader.open(mode("r")).unwrap());

    assert_eq!(reader.read(5).unwrap().unwrap(), b"test ");
    assert!(reader.seek(2, SEEK_CUR).unwrap());
    assert_eq!(reader.tell().unwrap(), Some(7));
    assert_eq!(read_remaining(&mut reader).unwrap(), b"ntent");

    // Later seeks reuse the seekable handle
    assert!(reader.seek(0, SEEK_SET).unwrap());
    assert!(reader.is_seekable());
    assert_eq!(reader.read(4).unwrap().unwrap(), b"test");
}

#[test]
fn test_seek_with_invalid_whence_fails() {
    let backend = seeded_backend(&[("seek.txt", TEST_CONTENT)]).unwrap();
    let mut reader = stream(&backend, "seek.txt");
    assert!(reader.open(mode("r")).unwrap());
    reader.read(3).unwrap();

    assert!(!reader.seek(1, 666).unwrap());
    assert_eq!(reader.tell().unwrap(), Some(3));
    assert!(!reader.is_seekable());

    assert!(!reader.seek(-20, SEEK_CUR).unwrap());
    assert_eq!(reader.tell().unwrap(), Some(3));
}

#[test]
fn test_seek_before_open_fails() {
    let backend = memory_backend().unwrap();
    let mut reader = stream(&backend, "missing");
    assert!(!reader.seek(0, SEEK_SET).unwrap());
    assert_eq!(reader.tell().unwrap(), None);
    assert!(reader.eof());
}

#[test]
fn test_seek_on_upload_only_allows_no_op() {
    let backend = memory_backend().unwrap();
    let mut writer = stream(&backend, "upload.bin");
    assert!(writer.open(mode("w")).unwrap());
    writer.write(b"abcdef").unwrap();

    assert!(writer.seek(0, SEEK_CUR).unwrap());
    assert!(writer.seek(6, SEEK_SET).unwrap());
    assert!(!writer.seek(0, SEEK_SET).unwrap());
    assert_eq!(writer.tell().unwrap(), Some(6));

    assert!(writer.close().unwrap());
    assert_object_eq(backend.as_ref(), "upload.bin", b"abcdef").unwrap();
}

#[test]
fn test_sniffed_content_type_is_declared() {
    init_tracing();
    let backend = memory_backend().unwrap();
    let mut writer = ObjectStream::new(backend.clone(), "logo.png", sniffing_config()).unwrap();

    assert!(writer.open(mode("wb")).unwrap());
    assert!(writer.is_buffered());
    writer.write(&PNG_HEADER[..10]).unwrap();
    writer.write(&PNG_HEADER[10..]).unwrap();
    assert_object_missing(backend.as_ref(), "logo.png").unwrap();

    assert!(writer.close().unwrap());
    assert_content_type(backend.as_ref(), "logo.png", "image/png").unwrap();
    assert_object_eq(backend.as_ref(), "logo.png", PNG_HEADER).unwrap();
}

#[test]
fn test_sniffing_only_applies_to_truncating_writes() {
    let backend = seeded_backend(&[("doc.pdf", PDF_DOCUMENT)]).unwrap();

    let mut appender = ObjectStream::new(backend.clone(), "doc.pdf", sniffing_config()).unwrap();
    assert!(appender.open(mode("a")).unwrap());
    assert!(!appender.is_buffered());
    appender.close().unwrap();

    let mut writer = stream(&backend, "plain.pdf");
    assert!(writer.open(mode("w")).unwrap());
    assert!(!writer.is_buffered());
    writer.write(PDF_DOCUMENT).unwrap();
    writer.close().unwrap();
    let info = backend.head("plain.pdf").unwrap().unwrap();
    assert_eq!(info.content_type, None);
}

#[test]
fn test_sniff_prefix_length_is_configurable() {
    let backend = memory_backend().unwrap();
    let mut config = sniffing_config();
    config.sniff.prefix_len = 4;

    let mut writer = ObjectStream::new(backend.clone(), "short.pdf", config).unwrap();
    write_stream(&mut writer, "w", PDF_DOCUMENT).unwrap();
    // "%PDF" alone is not a full signature
    assert_content_type(backend.as_ref(), "short.pdf", "text/plain").unwrap();
    assert_object_eq(backend.as_ref(), "short.pdf", PDF_DOCUMENT).unwrap();
}

#[test]
fn test_custom_sniffer() {
    struct Fixed;
    impl ContentSniffer for Fixed {
        fn sniff(&self, _prefix: &[u8]) -> String {
            "application/x-custom".to_string()
        }
    }

    let backend = memory_backend().unwrap();
    let mut writer = ObjectStream::new(backend.clone(), "custom", sniffing_config())
        .unwrap()
        .with_sniffer(Arc::new(Fixed));
    write_stream(&mut writer, "w", b"payload").unwrap();
    assert_content_type(backend.as_ref(), "custom", "application/x-custom").unwrap();
}

#[test]
fn test_empty_sniffed_upload() {
    let backend = memory_backend().unwrap();
    let mut writer = ObjectStream::new(backend.clone(), "empty", sniffing_config()).unwrap();
    assert!(writer.open(mode("w")).unwrap());
    assert!(writer.close().unwrap());

    assert_content_type(backend.as_ref(), "empty", "application/x-empty").unwrap();
    assert_object_eq(backend.as_ref(), "empty", b"").unwrap();
}

#[test]
fn test_combined_modes_conflict() {
    let backend = seeded_backend(&[("file", b"data")]).unwrap();
    for raw in ["r+", "w+", "a+", "x+", "rb+", "r+b"] {
        let mut s = stream(&backend, "file");
        let err = s.open(mode(raw)).unwrap_err();
        assert!(
            matches!(err, StreamError::ModeConflict { .. }),
            "{} gave {:?}",
            raw,
            err
        );
        assert!(err.is_logic_violation());
        assert_eq!(s.tell().unwrap(), None);
    }
}

#[test]
fn test_mode_violations_are_access_denied() {
    let backend = seeded_backend(&[("file", b"data")]).unwrap();

    let mut reader = stream(&backend, "file");
    reader.open(mode("r")).unwrap();
    let err = reader.write(b"x").unwrap_err();
    assert!(matches!(err, StreamError::AccessDenied { operation: "write", .. }));

    let mut writer = stream(&backend, "other");
    writer.open(mode("w")).unwrap();
    let err = writer.read(1).unwrap_err();
    assert!(matches!(err, StreamError::AccessDenied { operation: "read", .. }));
    assert!(err.is_logic_violation());
}

#[test]
fn test_read_missing_key_is_backend_open_error() {
    let backend = memory_backend().unwrap();
    let mut reader = stream(&backend, "nowhere");
    let err = reader.open(mode("r")).unwrap_err();
    match err {
        StreamError::BackendOpen { key, .. } => assert_eq!(key, "nowhere"),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(reader.read(1).unwrap(), None);
}

#[test]
fn test_exclusive_create() {
    let backend = seeded_backend(&[("taken", b"old")]).unwrap();

    let mut existing = stream(&backend, "taken");
    assert!(matches!(
        existing.open(mode("x")),
        Err(StreamError::BackendOpen { .. })
    ));
    assert_object_eq(backend.as_ref(), "taken", b"old").unwrap();

    let mut fresh = stream(&backend, "free");
    write_stream(&mut fresh, "x", b"new").unwrap();
    assert_object_eq(backend.as_ref(), "free", b"new").unwrap();
}

#[test]
fn test_append_preserves_existing_content() {
    let backend = memory_backend().unwrap();
    put_object(backend.as_ref(), "log.txt", b"first;", Some("text/plain")).unwrap();

    let mut appender = stream(&backend, "log.txt");
    assert!(appender.open(mode("a")).unwrap());
    assert_eq!(appender.tell().unwrap(), Some(6));
    appender.write(b"second;").unwrap();
    assert!(appender.close().unwrap());

    assert_object_eq(backend.as_ref(), "log.txt", b"first;second;").unwrap();
    assert_content_type(backend.as_ref(), "log.txt", "text/plain").unwrap();

    let mut created = stream(&backend, "new.log");
    write_stream(&mut created, "a", b"only").unwrap();
    assert_object_eq(backend.as_ref(), "new.log", b"only").unwrap();
}

#[test]
fn test_truncating_write_replaces_content() {
    let backend = seeded_backend(&[("file", b"a much longer original")]).unwrap();
    let mut writer = stream(&backend, "file");
    write_stream(&mut writer, "w", b"short").unwrap();
    assert_object_eq(backend.as_ref(), "file", b"short").unwrap();
}

#[test]
fn test_upload_invisible_until_close() {
    let backend = memory_backend().unwrap();
    let mut writer = stream(&backend, "pending");
    writer.open(mode("w")).unwrap();
    writer.write(b"data").unwrap();
    assert!(writer.flush().unwrap());
    assert_object_missing(backend.as_ref(), "pending").unwrap();

    writer.close().unwrap();
    assert_object_eq(backend.as_ref(), "pending", b"data").unwrap();
}

#[test]
fn test_double_close_and_close_without_open() {
    let backend = memory_backend().unwrap();
    let mut s = stream(&backend, "file");
    assert!(!s.close().unwrap());

    s.open(mode("w")).unwrap();
    assert!(s.close().unwrap());
    assert!(!s.close().unwrap());
    assert!(!s.flush().unwrap());
    assert_eq!(s.read(1).unwrap(), None);
    assert_eq!(s.write(b"x").unwrap(), None);
}

#[test]
fn test_unlink_requires_truncating_mode() {
    let backend = seeded_backend(&[("keep", b"kept"), ("drop", b"dropped")]).unwrap();

    let mut reader = stream(&backend, "keep");
    reader.open(mode("r")).unwrap();
    assert!(!reader.unlink().unwrap());
    reader.close().unwrap();
    assert_object_eq(backend.as_ref(), "keep", b"kept").unwrap();

    let mut appender = stream(&backend, "keep");
    appender.open(mode("a")).unwrap();
    assert!(!appender.unlink().unwrap());
    appender.close().unwrap();
    assert_object_eq(backend.as_ref(), "keep", b"kept").unwrap();

    let mut unopened = stream(&backend, "drop");
    assert!(!unopened.unlink().unwrap());

    let mut writer = stream(&backend, "drop");
    writer.open(mode("w")).unwrap();
    assert!(writer.unlink().unwrap());
    assert_object_missing(backend.as_ref(), "drop").unwrap();
}

#[test]
fn test_unlinked_upload_is_never_committed() {
    let backend = seeded_backend(&[("victim", b"old"), ("sniffed", b"old")]).unwrap();

    let mut writer = stream(&backend, "victim");
    writer.open(mode("w")).unwrap();
    writer.write(b"discarded").unwrap();
    assert!(writer.unlink().unwrap());
    assert!(!writer.close().unwrap());
    assert_object_missing(backend.as_ref(), "victim").unwrap();

    {
        let mut buffered =
            ObjectStream::new(backend.clone(), "sniffed", sniffing_config()).unwrap();
        buffered.open(mode("w")).unwrap();
        assert!(buffered.is_buffered());
        buffered.write(PNG_HEADER).unwrap();
        assert!(buffered.unlink().unwrap());
        assert_eq!(buffered.write(b"late").unwrap(), None);
    }
    assert_object_missing(backend.as_ref(), "sniffed").unwrap();
}

#[test]
fn test_unlink_then_drop_keeps_key_absent() {
    let backend = seeded_backend(&[("victim", b"old")]).unwrap();
    {
        let mut writer = stream(&backend, "victim");
        writer.open(mode("w")).unwrap();
        writer.write(b"pending").unwrap();
        assert!(writer.unlink().unwrap());
    }
    assert_object_missing(backend.as_ref(), "victim").unwrap();
}

#[test]
fn test_stat_on_open_handle() {
    let backend = memory_backend().unwrap();
    put_object(backend.as_ref(), "img.png", PNG_HEADER, Some("image/png")).unwrap();

    let mut reader = stream(&backend, "img.png");
    reader.open(mode("r")).unwrap();
    reader.read(4).unwrap();
    let stat = reader.stat().unwrap().unwrap();
    assert_eq!(stat.size, PNG_HEADER.len() as u64);
    assert_eq!(stat.position, 4);
    assert_eq!(stat.content_type.as_deref(), Some("image/png"));
    assert!(stat.last_modified.is_some());
    assert!(!stat.is_dir);

    let mut writer = stream(&backend, "new.bin");
    writer.open(mode("w")).unwrap();
    assert_eq!(writer.stat().unwrap().unwrap().last_modified, None);
}

#[test]
fn test_stat_without_handle_detects_prefixes() {
    let backend = seeded_backend(&[("photos/a.jpg", b"\xFF\xD8\xFF"), ("file", b"x")]).unwrap();

    let mut dir = stream(&backend, "photos");
    let stat = dir.stat().unwrap().unwrap();
    assert!(stat.is_dir);

    let mut file = stream(&backend, "file");
    assert_eq!(file.stat().unwrap(), None);
    let mut missing = stream(&backend, "nothing");
    assert_eq!(missing.stat().unwrap(), None);
}

#[test]
fn test_cast_exposes_active_transport() {
    let backend = seeded_backend(&[("file", TEST_CONTENT)]).unwrap();
    let mut reader = stream(&backend, "file");
    assert!(reader.cast(CastKind::Stdio).is_none());

    reader.open(mode("r")).unwrap();
    let transport = reader.cast(CastKind::Select).unwrap();
    assert_eq!(transport.len(), TEST_CONTENT.len() as u64);
    assert!(!transport.is_seekable());
}

#[test]
fn test_reopen_closes_previous_handle() {
    let backend = memory_backend().unwrap();
    let mut s = stream(&backend, "file");
    s.open(mode("w")).unwrap();
    s.write(b"committed").unwrap();

    s.open(mode("r")).unwrap();
    assert_eq!(read_remaining(&mut s).unwrap(), b"committed");
}

#[test]
fn test_drop_commits_open_upload() {
    let backend = memory_backend().unwrap();
    {
        let mut writer = stream(&backend, "dropped");
        writer.open(mode("w")).unwrap();
        writer.write(b"kept anyway").unwrap();
    }
    assert_object_eq(backend.as_ref(), "dropped", b"kept anyway").unwrap();
}

#[test]
fn test_large_multipart_round_trip() {
    use keystream_core::TransportConfig;
    use keystream_testing::fixtures::memory_backend_with_config;

    let backend = memory_backend_with_config(TransportConfig {
        read_chunk_size: 1000,
        write_buffer_size: 4096,
        multipart_threshold: 4096,
        min_part_size: 4096,
        ..Default::default()
    })
    .unwrap();
    let payload: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();

    let mut writer = stream(&backend, "large.bin");
    writer.open(mode("w")).unwrap();
    for chunk in payload.chunks(3000) {
        writer.write(chunk).unwrap();
    }
    writer.close().unwrap();

    let mut reader = stream(&backend, "large.bin");
    reader.open(mode("r")).unwrap();
    assert!(reader.seek(-1500, SEEK_END).unwrap());
    assert_eq!(reader.read(2000).unwrap().unwrap(), &payload[48_500..]);
    assert!(reader.seek(10, SEEK_SET).unwrap());
    assert_eq!(reader.read(5).unwrap().unwrap(), &payload[10..15]);
}
