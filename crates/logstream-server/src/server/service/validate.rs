//! Request validation.
//!
//! Each check collects every violated rule into a [`ViolationReport`] instead
//! of stopping at the first one, so a client sees all of its mistakes in a
//! single `INVALID_ARGUMENT` response. None of these functions touch storage.

use logstream_core::{
    Error, Result,
    proto::{
        ListLogRequest, ListLogsRequest, ListLogsStreamRequest, Log, SaveLogRequest,
        SaveLogsRequest,
    },
    types::{Level, LogFilter, NewLog, ViolationReport},
};

const EMPTY: &str = "empty";
const INVALID: &str = "invalid value";

/// Checks a record on the write path.
///
/// A missing record is reported as `log` alone; field checks only run when
/// the record is present.
pub fn validate_save(log: Option<&Log>) -> ViolationReport {
    let mut report = ViolationReport::new();
    let Some(log) = log else {
        report.push("log", EMPTY);
        return report;
    };

    if log.source.is_empty() {
        report.push("log.source", EMPTY);
    }
    if Level::from_raw(log.level).is_none() {
        report.push("log.level", INVALID);
    }
    if log.message.is_empty() {
        report.push("log.message", EMPTY);
    }
    if log.timestamp == 0 {
        report.push("log.timestamp", EMPTY);
    }
    report
}

/// Checks a lookup id. Zero is the wire default and means "unset".
pub fn validate_get(id: i32) -> ViolationReport {
    let mut report = ViolationReport::new();
    if id == 0 {
        report.push("id", EMPTY);
    } else if id < 0 {
        report.push("id", INVALID);
    }
    report
}

/// Checks range query parameters. Both bounds are required and checked
/// independently.
pub fn validate_query(level: Option<i32>, start_time: i64, end_time: i64) -> ViolationReport {
    let mut report = ViolationReport::new();
    if level.is_some_and(|l| Level::from_raw(l).is_none()) {
        report.push("level", INVALID);
    }
    if start_time == 0 {
        report.push("start_time", EMPTY);
    }
    if end_time == 0 {
        report.push("end_time", EMPTY);
    }
    report
}

/// Checks a batch: non-empty, no larger than `max`, and every record valid
/// under [`validate_save`] (reported as `logs[i].field`).
pub fn validate_batch(logs: &[Log], max: usize) -> ViolationReport {
    let mut report = ViolationReport::new();
    if logs.is_empty() {
        report.push("logs", EMPTY);
        return report;
    }
    if logs.len() > max {
        report.push("logs", format!("too many records: {} (max = {max})", logs.len()));
    }
    for (i, log) in logs.iter().enumerate() {
        report.extend_nested(&format!("logs[{i}]"), validate_save(Some(log)));
    }
    report
}

pub fn parse_save(req: SaveLogRequest) -> Result<NewLog> {
    let report = validate_save(req.log.as_ref());
    match req.log {
        Some(log) if report.is_empty() => Ok(NewLog::from(log)),
        _ => Err(Error::InvalidArgument(report)),
    }
}

pub fn parse_batch(req: SaveLogsRequest, max: usize) -> Result<Vec<NewLog>> {
    validate_batch(&req.logs, max).into_result()?;
    Ok(req.logs.into_iter().map(NewLog::from).collect())
}

pub fn parse_get(req: &ListLogRequest) -> Result<i32> {
    validate_get(req.id).into_result()?;
    Ok(req.id)
}

pub fn parse_query(req: ListLogsRequest) -> Result<LogFilter> {
    validate_query(req.level, req.start_time, req.end_time).into_result()?;
    LogFilter::try_from(req)
}

pub fn parse_stream_query(req: ListLogsStreamRequest) -> Result<LogFilter> {
    validate_query(req.level, req.start_time, req.end_time).into_result()?;
    LogFilter::try_from(req)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_log() -> Log {
        Log {
            id: None,
            source: "api".to_string(),
            level: Level::Warn.as_i32(),
            message: "disk low".to_string(),
            timestamp: 1_700_000_000,
        }
    }

    fn fields(report: &ViolationReport) -> Vec<&str> {
        report.fields().collect()
    }

    #[test]
    fn valid_record_passes() {
        assert!(validate_save(Some(&valid_log())).is_empty());
    }

    #[test]
    fn every_bad_field_is_reported_in_one_pass() {
        let log = Log {
            id: None,
            source: String::new(),
            level: 7,
            message: String::new(),
            timestamp: 0,
        };
        let report = validate_save(Some(&log));
        assert_eq!(
            fields(&report),
            ["log.source", "log.level", "log.message", "log.timestamp"]
        );
    }

    #[test]
    fn missing_record_suppresses_field_checks() {
        let report = validate_save(None);
        assert_eq!(fields(&report), ["log"]);
    }

    #[test]
    fn zero_and_negative_ids_are_rejected() {
        assert!(validate_get(1).is_empty());
        assert_eq!(fields(&validate_get(0)), ["id"]);
        assert_eq!(validate_get(-3).iter().next().unwrap().description, INVALID);
    }

    #[test]
    fn query_bounds_are_checked_independently() {
        assert_eq!(fields(&validate_query(None, 0, 10)), ["start_time"]);
        assert_eq!(fields(&validate_query(None, 10, 0)), ["end_time"]);
        assert_eq!(
            fields(&validate_query(Some(4), 0, 0)),
            ["level", "start_time", "end_time"]
        );
        assert!(validate_query(Some(2), 1, 2).is_empty());
    }

    #[test]
    fn batch_reports_nested_paths() {
        let mut bad = valid_log();
        bad.source.clear();
        bad.timestamp = 0;
        let report = validate_batch(&[valid_log(), bad], 10);
        assert_eq!(fields(&report), ["logs[1].source", "logs[1].timestamp"]);
    }

    #[test]
    fn batch_size_is_bounded() {
        assert_eq!(fields(&validate_batch(&[], 10)), ["logs"]);
        let report = validate_batch(&[valid_log(), valid_log(), valid_log()], 2);
        assert_eq!(fields(&report), ["logs"]);
    }

    #[test]
    fn parse_save_drops_client_id() {
        let mut log = valid_log();
        log.id = Some(42);
        let new_log = parse_save(SaveLogRequest { log: Some(log) }).unwrap();
        assert_eq!(new_log, NewLog::new("api", Level::Warn, "disk low", 1_700_000_000));
    }

    #[test]
    fn parse_query_builds_filter() {
        let req = ListLogsRequest {
            source: Some("api".to_string()),
            level: Some(Level::Error.as_i32()),
            keyword: Some("disk".to_string()),
            start_time: 1,
            end_time: 2,
        };
        let filter = parse_query(req).unwrap();
        assert_eq!(
            filter,
            LogFilter::between(1, 2)
                .with_source("api")
                .with_level(Level::Error)
                .with_keyword("disk")
        );
    }

    #[test]
    fn parse_errors_are_invalid_argument() {
        let err = parse_get(&ListLogRequest { id: 0 }).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(ref r) if r.len() == 1));
    }
}
