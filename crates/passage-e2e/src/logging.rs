//! Structured logging for the e2e suite.
//!
//! Dual output: human-readable text on the test writer, filtered through
//! `PASSAGE_LOG` (default `warn`), plus machine-parseable JSON-lines to
//! the file named by `PASSAGE_LOG_FILE` when set, for post-hoc analysis
//! with `jq`. Safe to call from every test; only the first
//! initialization wins.

use std::fs::File;
use std::io::Write;
use std::sync::{Arc, Mutex};

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// A `MakeWriter` over a shared log file; each event locks, writes, and
/// unlocks.
#[derive(Clone)]
struct SharedFileWriter {
    file: Arc<Mutex<File>>,
}

struct SharedFileGuard<'a> {
    guard: std::sync::MutexGuard<'a, File>,
}

impl Write for SharedFileGuard<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.guard.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.guard.flush()
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedFileWriter {
    type Writer = SharedFileGuard<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        SharedFileGuard {
            guard: self.file.lock().expect("log file mutex poisoned"),
        }
    }
}

/// Initialize the test-suite subscriber. Idempotent.
pub fn init() {
    let filter =
        EnvFilter::try_from_env("PASSAGE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let json_layer = std::env::var("PASSAGE_LOG_FILE")
        .ok()
        .and_then(|path| File::create(path).ok())
        .map(|file| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(SharedFileWriter {
                    file: Arc::new(Mutex::new(file)),
                })
        });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .with(json_layer)
        .try_init();
}
