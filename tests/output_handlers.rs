use std::sync::Arc;
use std::thread;

use procctl::process::{
    LinesOutputHandler, NullOutputHandler, OutputHandler, OutputHandlerExt, StringOutputHandler,
};

#[test]
fn string_handler_accumulates_chunks_in_order() {
    let handler = StringOutputHandler::new();
    handler.on_output(b"hel", false);
    handler.on_output(b"lo\n", false);
    assert!(!handler.is_complete());
    handler.on_output(b"", true);

    assert_eq!(handler.result(), "hello\n");
    assert!(handler.is_complete());
}

#[test]
fn string_handler_result_is_partial_while_streaming() {
    let handler = StringOutputHandler::new();
    assert_eq!(handler.result(), "");

    handler.on_output(b"first ", false);
    assert_eq!(handler.result(), "first ");

    handler.on_output(b"second", true);
    assert_eq!(handler.result(), "first second");
}

#[test]
fn string_handler_is_lossy_on_invalid_utf8() {
    let handler = StringOutputHandler::new();
    handler.on_output(&[b'o', b'k', 0xFF], true);
    assert_eq!(handler.result(), "ok\u{FFFD}");
    assert_eq!(handler.bytes(), vec![b'o', b'k', 0xFF]);
}

#[test]
fn clones_share_the_buffer() {
    let handler = StringOutputHandler::new();
    let reader = handler.clone();
    handler.on_output(b"shared", true);
    assert_eq!(reader.result(), "shared");
}

#[test]
fn mapped_handler_shares_accumulation_and_converts() {
    let base = StringOutputHandler::new();
    let trimmed_len = base.clone().map(|s| s.trim().len());

    trimmed_len.on_output(b"  abc  ", false);
    assert_eq!(trimmed_len.result(), 3);
    assert_eq!(base.result(), "  abc  ");

    base.on_output(b"de", true);
    assert_eq!(trimmed_len.result(), 7);
}

#[test]
fn lines_handler_splits_on_newlines() {
    let handler = LinesOutputHandler::new();
    handler.on_output(b"one\ntw", false);
    handler.on_output(b"o\nthree", true);
    assert_eq!(handler.result(), vec!["one", "two", "three"]);
}

#[test]
fn null_handler_discards() {
    let handler = NullOutputHandler;
    handler.on_output(b"ignored", true);
    handler.result();
}

#[test]
fn concurrent_reads_never_see_torn_chunks() {
    let handler = Arc::new(StringOutputHandler::new());
    let chunk = "abcdefghij";

    let writer = {
        let handler = Arc::clone(&handler);
        thread::spawn(move || {
            for _ in 0..500 {
                handler.on_output(chunk.as_bytes(), false);
            }
            handler.on_output(b"", true);
        })
    };

    for _ in 0..200 {
        let snapshot = handler.result();
        assert_eq!(snapshot.len() % chunk.len(), 0);
    }

    writer.join().unwrap();
    assert_eq!(handler.result().len(), 500 * chunk.len());
}
