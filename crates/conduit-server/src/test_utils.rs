//! Shared test doubles.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;
use tracing::Dispatch;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;

use crate::logging::{self, RestoreLogger};
use crate::service::{Database, Principal, TokenVerifier, Transaction, Verification};
use crate::{ErrorKind, Result};

/// Serializes tests that replace the process-wide logger.
pub static LOGGER_LOCK: LazyLock<AsyncMutex<()>> = LazyLock::new(|| AsyncMutex::new(()));

pub fn alice() -> Principal {
    Principal {
        user_id: 7,
        name: "alice".to_owned(),
        email: Some("alice@example.com".to_owned()),
    }
}

/// Verifier answering every token with the same outcome.
#[derive(Debug, Clone)]
pub struct ScriptedVerifier {
    verification: Verification,
}

impl ScriptedVerifier {
    pub fn new(verification: Verification) -> Self {
        Self { verification }
    }
}

impl TokenVerifier for ScriptedVerifier {
    fn verify(&self, _token: &str) -> Verification {
        self.verification.clone()
    }
}

#[derive(Debug, Default)]
struct Counters {
    fail_begin: AtomicBool,
    fail_commit: AtomicBool,
    begun: AtomicUsize,
    committed: AtomicUsize,
    rolled_back: AtomicUsize,
}

/// In-memory database recording how its transactions are resolved.
#[derive(Debug, Clone, Default)]
pub struct MockDatabase {
    counters: Arc<Counters>,
}

impl MockDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// A database whose `begin` always fails.
    pub fn unavailable() -> Self {
        let database = Self::default();
        database.counters.fail_begin.store(true, Ordering::SeqCst);
        database
    }

    /// A database whose commits fail after the handler succeeded.
    pub fn failing_commit() -> Self {
        let database = Self::default();
        database.counters.fail_commit.store(true, Ordering::SeqCst);
        database
    }

    pub fn begun(&self) -> usize {
        self.counters.begun.load(Ordering::SeqCst)
    }

    pub fn committed(&self) -> usize {
        self.counters.committed.load(Ordering::SeqCst)
    }

    pub fn rolled_back(&self) -> usize {
        self.counters.rolled_back.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct MockTransaction {
    counters: Arc<Counters>,
}

#[async_trait]
impl Database for MockDatabase {
    type Transaction = MockTransaction;

    async fn begin(&self) -> Result<MockTransaction> {
        if self.counters.fail_begin.load(Ordering::SeqCst) {
            return Err(ErrorKind::Database.with_context("connection refused"));
        }

        self.counters.begun.fetch_add(1, Ordering::SeqCst);
        Ok(MockTransaction {
            counters: Arc::clone(&self.counters),
        })
    }
}

#[async_trait]
impl Transaction for MockTransaction {
    async fn commit(self) -> Result<()> {
        if self.counters.fail_commit.load(Ordering::SeqCst) {
            return Err(ErrorKind::Database.with_context("commit refused"));
        }

        self.counters.committed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.counters.rolled_back.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// In-memory sink for JSON formatted log lines.
#[derive(Debug, Clone, Default)]
pub struct CapturedLogs {
    buffer: Arc<Mutex<Vec<u8>>>,
}

pub struct CapturedWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl io::Write for CapturedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedWriter;

    fn make_writer(&'a self) -> Self::Writer {
        CapturedWriter {
            buffer: Arc::clone(&self.buffer),
        }
    }
}

impl CapturedLogs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a JSON subscriber writing into this buffer as the
    /// process-wide logger.
    pub fn install(&self) -> RestoreLogger {
        self.install_with_level(LevelFilter::TRACE)
    }

    /// Like [`install`](Self::install), dropping everything below `level`.
    pub fn install_with_level(&self, level: LevelFilter) -> RestoreLogger {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_span_list(true)
            .with_current_span(false)
            .with_writer(self.clone());
        let subscriber = tracing_subscriber::registry().with(level).with(layer);
        logging::replace(Dispatch::new(subscriber))
    }

    /// Returns every captured line parsed as JSON.
    pub fn lines(&self) -> Vec<serde_json::Value> {
        let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buffer)
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    /// Returns the captured lines whose message equals `message`.
    pub fn with_message(&self, message: &str) -> Vec<serde_json::Value> {
        self.lines()
            .into_iter()
            .filter(|line| line["fields"]["message"] == message)
            .collect()
    }
}

/// Returns every `trace_id` recorded on the spans of a captured line.
pub fn trace_ids(line: &serde_json::Value) -> Vec<String> {
    line["spans"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|span| span["trace_id"].as_str())
        .map(str::to_owned)
        .collect()
}
