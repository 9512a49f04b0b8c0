//! In-memory [`LogRepository`] used by the service and streaming tests.

use super::LogRepository;
use logstream_core::{
    Error, Result,
    types::{Level, LogFilter, LogRecord, NewLog},
};
use portable_atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct MemoryRepository {
    logs: Mutex<Vec<LogRecord>>,
    next_id: AtomicUsize,
    calls: AtomicUsize,
    fail_with: Mutex<Option<Error>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Repository pre-filled with `logs`, ids assigned from 1 in order.
    pub fn with_logs(logs: impl IntoIterator<Item = NewLog>) -> Self {
        let repo = Self::new();
        for log in logs {
            repo.insert(log).unwrap();
        }
        repo
    }

    /// Makes every following call fail with `err`.
    pub fn fail_with(&self, err: Error) {
        *self.fail_with.lock().unwrap() = Some(err);
    }

    /// Number of repository calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.logs.lock().unwrap().len()
    }

    fn enter(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        match self.fail_with.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn insert(&self, log: NewLog) -> Result<i32> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) as i32 + 1;
        let record = log.into_record(id)?;
        self.logs.lock().unwrap().push(record);
        Ok(id)
    }
}

fn matches(filter: &LogFilter, log: &LogRecord) -> bool {
    log.created_at >= filter.start_time
        && log.created_at <= filter.end_time
        && filter.source.as_ref().is_none_or(|s| &log.source == s)
        && filter.level.is_none_or(|l| log.level == l)
        && filter
            .keyword
            .as_ref()
            .is_none_or(|k| log.message.contains(k.as_str()))
}

#[tonic::async_trait]
impl LogRepository for MemoryRepository {
    async fn get_log(&self, id: i32) -> Result<LogRecord> {
        self.enter()?;
        self.logs
            .lock()
            .unwrap()
            .iter()
            .find(|log| log.id == id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("log {id}")))
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<LogRecord>> {
        self.enter()?;
        let mut logs: Vec<_> = self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| matches(filter, log))
            .cloned()
            .collect();
        logs.sort_by_key(|log| (log.created_at, log.id));
        Ok(logs)
    }

    async fn add_log(&self, log: &NewLog) -> Result<i32> {
        self.enter()?;
        Level::try_from(log.level)?;
        self.insert(log.clone())
    }

    async fn add_logs(&self, logs: &[NewLog]) -> Result<Vec<i32>> {
        self.enter()?;
        if logs.is_empty() {
            return Err(Error::EmptyBatch);
        }
        // All or nothing: check every level before inserting any record.
        for log in logs {
            Level::try_from(log.level)?;
        }
        logs.iter().cloned().map(|log| self.insert(log)).collect()
    }
}
