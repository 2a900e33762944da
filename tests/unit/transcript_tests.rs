//! Unit tests for the JSONL transcript observer.

use std::fs;

use chrono::Utc;
use serde_json::{json, Value};

use agent_relay::models::event::SessionEvent;
use agent_relay::models::record::OutputRecord;
use agent_relay::observer::{JsonlTranscriptWriter, SessionObserver, TracingObserver, TranscriptEntry};
use agent_relay::{AppError, ProcessState};

fn read_lines(writer: &JsonlTranscriptWriter) -> Vec<Value> {
    let path = writer.path_for(Utc::now().date_naive());
    fs::read_to_string(path)
        .expect("transcript exists")
        .lines()
        .map(|line| serde_json::from_str(line).expect("valid json line"))
        .collect()
}

#[test]
fn new_creates_missing_directory() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = temp.path().join("a").join("b");
    assert!(!dir.exists());
    JsonlTranscriptWriter::new(dir.clone()).expect("constructor");
    assert!(dir.is_dir());
}

#[test]
fn every_event_kind_is_written_as_one_line() {
    let temp = tempfile::tempdir().expect("tempdir");
    let writer = JsonlTranscriptWriter::new(temp.path().to_path_buf()).expect("writer");

    let events = [
        SessionEvent::StateChanged {
            from: ProcessState::Initializing,
            to: ProcessState::Ready,
        },
        SessionEvent::SessionReady {
            session_id: "S1".into(),
        },
        SessionEvent::RecordObserved {
            turn: Some(1),
            record: OutputRecord::Content {
                payload: json!({"type": "content", "text": "hi"}),
            },
        },
        SessionEvent::Failed(AppError::Upstream("rate limited".into())),
    ];
    for event in &events {
        writer.on_event("relay-1", event).expect("write");
    }

    let lines = read_lines(&writer);
    assert_eq!(lines.len(), 4);
    assert!(lines.iter().all(|l| l["session"] == "relay-1"));
    assert!(lines.iter().all(|l| l["timestamp"].is_string()));

    assert_eq!(lines[0]["kind"], "state_changed");
    assert_eq!(lines[0]["state"], "ready");
    assert_eq!(lines[1]["kind"], "session_ready");
    assert_eq!(lines[1]["session_id"], "S1");
    assert_eq!(lines[2]["kind"], "record_observed");
    assert_eq!(lines[2]["turn"], 1);
    assert_eq!(lines[2]["record"]["kind"], "content");
    assert_eq!(lines[2]["record"]["payload"]["text"], "hi");
    assert_eq!(lines[3]["kind"], "failed");
    assert_eq!(lines[3]["error"], "upstream error: rate limited");
    assert!(lines[3].get("record").is_none());
}

#[test]
fn appends_across_writer_instances() {
    let temp = tempfile::tempdir().expect("tempdir");
    let event = SessionEvent::SessionReady {
        session_id: "S1".into(),
    };
    for _ in 0..2 {
        let writer = JsonlTranscriptWriter::new(temp.path().to_path_buf()).expect("writer");
        writer.on_event("relay", &event).expect("write");
    }
    let writer = JsonlTranscriptWriter::new(temp.path().to_path_buf()).expect("writer");
    assert_eq!(read_lines(&writer).len(), 2);
}

#[test]
fn concurrent_writes_stay_line_delimited() {
    let temp = tempfile::tempdir().expect("tempdir");
    let writer = std::sync::Arc::new(
        JsonlTranscriptWriter::new(temp.path().to_path_buf()).expect("writer"),
    );

    let handles: Vec<_> = (0..8)
        .map(|n| {
            let writer = std::sync::Arc::clone(&writer);
            std::thread::spawn(move || {
                for _ in 0..10 {
                    writer
                        .on_event(
                            &format!("s{n}"),
                            &SessionEvent::RecordObserved {
                                turn: None,
                                record: OutputRecord::Unknown {
                                    record_type: "x".into(),
                                    raw: "{}".into(),
                                },
                            },
                        )
                        .expect("write");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("join");
    }
    assert_eq!(read_lines(&writer).len(), 80);
}

#[test]
fn tracing_observer_never_fails() {
    let observer = TracingObserver;
    observer
        .on_event("s", &SessionEvent::Failed(AppError::Cancelled("x".into())))
        .expect("tracing observer is infallible");
}

#[test]
fn entry_lands_in_the_file_of_its_own_day() {
    let temp = tempfile::tempdir().expect("tempdir");
    let writer = JsonlTranscriptWriter::new(temp.path().to_path_buf()).expect("writer");
    let event = SessionEvent::SessionReady {
        session_id: "S1".into(),
    };

    let mut late = TranscriptEntry::from_event("relay", &event);
    late.timestamp = Utc::now() - chrono::Duration::days(1);
    writer.append(&late).expect("append yesterday");
    writer.on_event("relay", &event).expect("append today");

    let yesterday = writer.path_for(late.timestamp.date_naive());
    let old = fs::read_to_string(yesterday).expect("yesterday's transcript");
    assert_eq!(old.lines().count(), 1);
    assert_eq!(read_lines(&writer).len(), 1);
}
