//! # Log Record Domain Types
//!
//! This module defines the types exchanged between the validator, the
//! repository and the streaming layer. They are deliberately decoupled from
//! the generated Protobuf messages: the wire format allows values the domain
//! does not (unknown enum numbers, missing messages), and conversion into these
//! types is where that gap is closed.
//!
//! ## Overview
//!
//! - [`Level`] - Bounded severity enumeration (`INFO`, `WARN`, `ERROR`).
//! - [`LogRecord`] - A stored record; always carries its assigned id.
//! - [`NewLog`] - A record on the write path, before an id exists.
//! - [`LogFilter`] - Predicates for a range query.
//! - [`ViolationReport`] - Ordered `(field, description)` validation failures.

use crate::{Error, proto};
use core::fmt;

/// Severity of a log record.
///
/// The numeric values are part of the wire and storage contract: they are
/// written to the `lvl` column and carried as the `Level` Protobuf enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(i32)]
pub enum Level {
    Info = 0,
    Warn = 1,
    Error = 2,
}

impl Level {
    /// Returns the numeric value stored in the `lvl` column.
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// Returns the level for a raw value, or `None` when it is out of range.
    pub const fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Self::Info),
            1 => Some(Self::Warn),
            2 => Some(Self::Error),
            _ => None,
        }
    }
}

impl TryFrom<i32> for Level {
    type Error = Error;

    fn try_from(level: i32) -> Result<Self, Error> {
        Self::from_raw(level).ok_or(Error::InvalidLevel { level })
    }
}

impl From<Level> for proto::Level {
    fn from(level: Level) -> Self {
        match level {
            Level::Info => Self::Info,
            Level::Warn => Self::Warn,
            Level::Error => Self::Error,
        }
    }
}

impl From<proto::Level> for Level {
    fn from(level: proto::Level) -> Self {
        match level {
            proto::Level::Info => Self::Info,
            proto::Level::Warn => Self::Warn,
            proto::Level::Error => Self::Error,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warn => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// A persisted log record.
///
/// Records are immutable once stored. The `id` is assigned by the database on
/// insert and never changes or gets reused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub id: i32,
    pub source: String,
    pub level: Level,
    pub message: String,
    /// Seconds since the Unix epoch, as supplied by the producer.
    pub created_at: i64,
}

impl From<LogRecord> for proto::Log {
    fn from(record: LogRecord) -> Self {
        Self {
            id: Some(record.id),
            source: record.source,
            level: proto::Level::from(record.level).into(),
            message: record.message,
            timestamp: record.created_at,
        }
    }
}

/// A log record on the write path.
///
/// `level` is the raw wire value. The repository refuses to insert anything
/// outside [`Level`], so a `NewLog` that skipped validation still cannot
/// persist an unknown severity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLog {
    pub source: String,
    pub level: i32,
    pub message: String,
    pub created_at: i64,
}

impl NewLog {
    pub fn new(
        source: impl Into<String>,
        level: Level,
        message: impl Into<String>,
        created_at: i64,
    ) -> Self {
        Self {
            source: source.into(),
            level: level.as_i32(),
            message: message.into(),
            created_at,
        }
    }

    /// Attaches the id assigned on insert.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLevel`] if `level` is not a known [`Level`].
    pub fn into_record(self, id: i32) -> Result<LogRecord, Error> {
        Ok(LogRecord {
            id,
            level: Level::try_from(self.level)?,
            source: self.source,
            message: self.message,
            created_at: self.created_at,
        })
    }
}

impl From<proto::Log> for NewLog {
    /// Drops any client-supplied `id`; identity is assigned by storage.
    fn from(log: proto::Log) -> Self {
        Self {
            source: log.source,
            level: log.level,
            message: log.message,
            created_at: log.timestamp,
        }
    }
}

/// Predicates for a range query over stored records.
///
/// `start_time` and `end_time` bound `created_at` inclusively. The optional
/// fields narrow the match when present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilter {
    pub source: Option<String>,
    pub level: Option<Level>,
    /// Substring that must appear in `message`.
    pub keyword: Option<String>,
    pub start_time: i64,
    pub end_time: i64,
}

impl LogFilter {
    pub const fn between(start_time: i64, end_time: i64) -> Self {
        Self {
            source: None,
            level: None,
            keyword: None,
            start_time,
            end_time,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub const fn with_level(mut self, level: Level) -> Self {
        self.level = Some(level);
        self
    }

    pub fn with_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keyword = Some(keyword.into());
        self
    }

    fn from_parts(
        source: Option<String>,
        level: Option<i32>,
        keyword: Option<String>,
        start_time: i64,
        end_time: i64,
    ) -> Result<Self, Error> {
        Ok(Self {
            source,
            level: level.map(Level::try_from).transpose()?,
            keyword,
            start_time,
            end_time,
        })
    }
}

impl TryFrom<proto::ListLogsRequest> for LogFilter {
    type Error = Error;

    fn try_from(req: proto::ListLogsRequest) -> Result<Self, Self::Error> {
        Self::from_parts(
            req.source,
            req.level,
            req.keyword,
            req.start_time,
            req.end_time,
        )
    }
}

impl TryFrom<proto::ListLogsStreamRequest> for LogFilter {
    type Error = Error;

    fn try_from(req: proto::ListLogsStreamRequest) -> Result<Self, Self::Error> {
        Self::from_parts(
            req.source,
            req.level,
            req.keyword,
            req.start_time,
            req.end_time,
        )
    }
}

/// A single failed validation rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Dotted path of the offending field, e.g. `log.source` or
    /// `logs[2].level`.
    pub field: String,
    pub description: String,
}

/// Ordered list of validation failures. Empty means valid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViolationReport {
    violations: Vec<Violation>,
}

impl ViolationReport {
    pub const fn new() -> Self {
        Self {
            violations: Vec::new(),
        }
    }

    pub fn push(&mut self, field: impl Into<String>, description: impl Into<String>) {
        self.violations.push(Violation {
            field: field.into(),
            description: description.into(),
        });
    }

    /// Appends every violation of `other`, prefixing its field paths with
    /// `prefix` (`log.source` under `logs[3]` becomes `logs[3].source`).
    pub fn extend_nested(&mut self, prefix: &str, other: Self) {
        for v in other.violations {
            let field = match v.field.split_once('.') {
                Some((_, rest)) => format!("{prefix}.{rest}"),
                None => prefix.to_string(),
            };
            self.violations.push(Violation {
                field,
                description: v.description,
            });
        }
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.violations.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Violation> {
        self.violations.iter()
    }

    /// Field paths in report order.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.violations.iter().map(|v| v.field.as_str())
    }

    /// Converts a non-empty report into [`Error::InvalidArgument`].
    pub fn into_result(self) -> Result<(), Error> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidArgument(self))
        }
    }
}

impl fmt::Display for ViolationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, v) in self.violations.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", v.field, v.description)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_rejects_out_of_range_values() {
        assert_eq!(Level::try_from(0).unwrap(), Level::Info);
        assert_eq!(Level::try_from(2).unwrap(), Level::Error);
        assert!(matches!(
            Level::try_from(3),
            Err(Error::InvalidLevel { level: 3 })
        ));
        assert!(matches!(
            Level::try_from(-1),
            Err(Error::InvalidLevel { level: -1 })
        ));
    }

    #[test]
    fn record_to_proto_populates_id() {
        let record = LogRecord {
            id: 7,
            source: "api".to_string(),
            level: Level::Warn,
            message: "disk low".to_string(),
            created_at: 1_700_000_000,
        };
        let log = proto::Log::from(record);
        assert_eq!(log.id, Some(7));
        assert_eq!(log.level(), proto::Level::Warn);
        assert_eq!(log.timestamp, 1_700_000_000);
    }

    #[test]
    fn new_log_from_proto_ignores_client_id() {
        let log = proto::Log {
            id: Some(99),
            source: "api".to_string(),
            level: 5,
            message: "m".to_string(),
            timestamp: 1,
        };
        let new_log = NewLog::from(log);
        assert_eq!(new_log.level, 5);
        assert!(new_log.clone().into_record(1).is_err());
    }

    #[test]
    fn filter_conversion_rejects_unknown_level() {
        let req = proto::ListLogsRequest {
            level: Some(9),
            start_time: 1,
            end_time: 2,
            ..Default::default()
        };
        assert!(LogFilter::try_from(req).is_err());

        let req = proto::ListLogsStreamRequest {
            source: Some("api".to_string()),
            level: Some(1),
            start_time: 1,
            end_time: 2,
            ..Default::default()
        };
        let filter = LogFilter::try_from(req).unwrap();
        assert_eq!(filter, LogFilter::between(1, 2).with_source("api").with_level(Level::Warn));
    }

    #[test]
    fn nested_report_rewrites_field_paths() {
        let mut inner = ViolationReport::new();
        inner.push("log.source", "empty");
        inner.push("log", "empty");

        let mut outer = ViolationReport::new();
        outer.extend_nested("logs[3]", inner);

        assert_eq!(outer.fields().collect::<Vec<_>>(), ["logs[3].source", "logs[3]"]);
        assert_eq!(outer.to_string(), "logs[3].source: empty; logs[3]: empty");
    }
}
