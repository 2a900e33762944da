//! Unit tests for the bounded NDJSON line codec and input encoding.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use agent_relay::process::codec::{LineCodec, MAX_LINE_BYTES};
use agent_relay::process::writer::InputFormat;
use agent_relay::AppError;

#[test]
fn decodes_complete_lines_and_waits_for_partial() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from("{\"a\":1}\n{\"b\"");

    assert_eq!(
        codec.decode(&mut buf).expect("decode").as_deref(),
        Some("{\"a\":1}")
    );
    assert_eq!(codec.decode(&mut buf).expect("decode"), None);

    buf.extend_from_slice(b":2}\n");
    assert_eq!(
        codec.decode(&mut buf).expect("decode").as_deref(),
        Some("{\"b\":2}")
    );
}

#[test]
fn strips_carriage_returns() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from("{}\r\n");
    assert_eq!(codec.decode(&mut buf).expect("decode").as_deref(), Some("{}"));
}

#[test]
fn oversized_line_is_skipped_and_next_line_decodes() {
    let mut codec = LineCodec::with_max_length(16);
    let mut buf = BytesMut::new();
    buf.extend_from_slice(&[b'x'; 40]);
    buf.extend_from_slice(b"\n{\"ok\":1}\n");

    assert_eq!(
        codec.decode(&mut buf).expect("oversized line is not an error").as_deref(),
        Some("{\"ok\":1}")
    );
}

#[test]
fn decode_eof_flushes_unterminated_line() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from("{\"tail\":true}");
    assert_eq!(
        codec.decode_eof(&mut buf).expect("decode").as_deref(),
        Some("{\"tail\":true}")
    );
}

#[test]
fn default_limit_is_one_mebibyte() {
    assert_eq!(MAX_LINE_BYTES, 1024 * 1024);
}

#[test]
fn encoder_appends_newline() {
    let mut codec = LineCodec::new();
    let mut dst = BytesMut::new();
    codec.encode("ping".to_owned(), &mut dst).expect("encode");
    assert_eq!(&dst[..], b"ping\n");
}

#[test]
fn text_input_is_one_line() {
    let bytes = InputFormat::Text.encode("hello").expect("encode");
    assert_eq!(bytes, b"hello\n");
}

#[test]
fn json_input_wraps_prompt_in_user_message() {
    let bytes = InputFormat::Json.encode("hi \"there\"").expect("encode");
    let line = std::str::from_utf8(&bytes).expect("utf8");
    let value: serde_json::Value = serde_json::from_str(line.trim_end()).expect("json");
    assert_eq!(value["type"], "user");
    assert_eq!(value["message"]["role"], "user");
    assert_eq!(value["message"]["content"], "hi \"there\"");
}

#[test]
fn blank_prompt_is_rejected_in_every_format() {
    for format in [InputFormat::Text, InputFormat::Json] {
        let err = format.encode(" \t").expect_err("blank");
        assert!(matches!(err, AppError::InvalidPrompt(_)), "got {err:?}");
    }
}
