//! Aggregate statistics over request logs.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::storage::RequestLog;

/// Most records scanned when computing statistics.
pub const MAX_SCANNED_RECORDS: usize = 100_000;

/// Overall totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    /// Every stored record, including those past the scan window
    pub total_requests: u64,
    /// Records the distinct counts and time range were computed over
    pub scanned_records: u64,
    pub unique_sources: u64,
    pub unique_paths: u64,
    pub first_request: Option<DateTime<Utc>>,
    pub last_request: Option<DateTime<Utc>>,
}

/// Per-path totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointStats {
    pub path: String,
    pub count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub unique_sources: u64,
}

/// Per-source totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceStats {
    pub source: String,
    pub count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub unique_paths: u64,
}

/// Running totals for one group key.
struct Group<'a> {
    count: u64,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    distinct: HashSet<&'a str>,
}

impl<'a> Group<'a> {
    fn new(at: DateTime<Utc>) -> Self {
        Self {
            count: 0,
            first_seen: at,
            last_seen: at,
            distinct: HashSet::new(),
        }
    }

    fn record(&mut self, at: DateTime<Utc>, other: &'a str) {
        self.count += 1;
        self.first_seen = self.first_seen.min(at);
        self.last_seen = self.last_seen.max(at);
        self.distinct.insert(other);
    }
}

/// Group `logs` by `key`, counting distinct `other` values per group, and
/// order by count descending then key.
fn group_by<'a>(
    logs: &'a [RequestLog],
    key: impl Fn(&'a RequestLog) -> &'a str,
    other: impl Fn(&'a RequestLog) -> &'a str,
) -> Vec<(&'a str, Group<'a>)> {
    let mut groups: HashMap<&str, Group<'_>> = HashMap::new();

    for log in logs {
        groups
            .entry(key(log))
            .or_insert_with(|| Group::new(log.timestamp))
            .record(log.timestamp, other(log));
    }

    let mut groups: Vec<_> = groups.into_iter().collect();
    groups.sort_by(|(a_key, a), (b_key, b)| b.count.cmp(&a.count).then_with(|| a_key.cmp(b_key)));
    groups
}

/// Totals over `logs`. `total_requests` is `logs.len()` until the caller
/// replaces it with the full store count.
pub fn summary(logs: &[RequestLog]) -> Summary {
    let sources: HashSet<&str> = logs.iter().map(|l| l.source.as_str()).collect();
    let paths: HashSet<&str> = logs.iter().map(|l| l.path.as_str()).collect();

    Summary {
        total_requests: logs.len() as u64,
        scanned_records: logs.len() as u64,
        unique_sources: sources.len() as u64,
        unique_paths: paths.len() as u64,
        first_request: logs.iter().map(|l| l.timestamp).min(),
        last_request: logs.iter().map(|l| l.timestamp).max(),
    }
}

pub fn endpoint_stats(logs: &[RequestLog]) -> Vec<EndpointStats> {
    group_by(logs, |l| &l.path, |l| &l.source)
        .into_iter()
        .map(|(path, group)| EndpointStats {
            path: path.to_owned(),
            count: group.count,
            first_seen: group.first_seen,
            last_seen: group.last_seen,
            unique_sources: group.distinct.len() as u64,
        })
        .collect()
}

pub fn source_stats(logs: &[RequestLog]) -> Vec<SourceStats> {
    group_by(logs, |l| &l.source, |l| &l.path)
        .into_iter()
        .map(|(source, group)| SourceStats {
            source: source.to_owned(),
            count: group.count,
            first_seen: group.first_seen,
            last_seen: group.last_seen,
            unique_paths: group.distinct.len() as u64,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn log(id: u64, source: &str, path: &str, minute: i64) -> RequestLog {
        RequestLog {
            id,
            source: source.to_string(),
            path: path.to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap() + Duration::minutes(minute),
        }
    }

    fn sample() -> Vec<RequestLog> {
        vec![
            log(1, "192.0.2.1", "/api/users", 0),
            log(2, "192.0.2.2", "/api/users", 1),
            log(3, "192.0.2.1", "/api/posts", 2),
            log(4, "192.0.2.1", "/api/users", 3),
            log(5, "192.0.2.3", "/health", 4),
        ]
    }

    #[test]
    fn test_summary() {
        let logs = sample();
        let summary = summary(&logs);

        assert_eq!(summary.total_requests, 5);
        assert_eq!(summary.scanned_records, 5);
        assert_eq!(summary.unique_sources, 3);
        assert_eq!(summary.unique_paths, 3);
        assert_eq!(summary.first_request, Some(logs[0].timestamp));
        assert_eq!(summary.last_request, Some(logs[4].timestamp));
    }

    #[test]
    fn test_summary_empty() {
        assert_eq!(summary(&[]), Summary::default());
    }

    #[test]
    fn test_endpoint_stats() {
        let logs = sample();
        let stats = endpoint_stats(&logs);

        assert_eq!(stats.len(), 3);
        assert_eq!(stats[0].path, "/api/users");
        assert_eq!(stats[0].count, 3);
        assert_eq!(stats[0].unique_sources, 2);
        assert_eq!(stats[0].first_seen, logs[0].timestamp);
        assert_eq!(stats[0].last_seen, logs[3].timestamp);

        // Ties ordered by path
        assert_eq!(stats[1].path, "/api/posts");
        assert_eq!(stats[2].path, "/health");
    }

    #[test]
    fn test_source_stats() {
        let logs = sample();
        let stats = source_stats(&logs);

        assert_eq!(stats.len(), 3);
        assert_eq!(stats[0].source, "192.0.2.1");
        assert_eq!(stats[0].count, 3);
        assert_eq!(stats[0].unique_paths, 2);
        assert_eq!(stats[1].source, "192.0.2.2");
        assert_eq!(stats[2].source, "192.0.2.3");
    }

    #[test]
    fn test_first_and_last_seen_ignore_order() {
        // Newest first, as returned by the store
        let mut logs = sample();
        logs.reverse();

        let stats = endpoint_stats(&logs);
        assert_eq!(stats[0].first_seen, log(0, "", "", 0).timestamp);
        assert_eq!(stats[0].last_seen, log(0, "", "", 3).timestamp);
    }

    #[test]
    fn test_empty_groups() {
        assert!(endpoint_stats(&[]).is_empty());
        assert!(source_stats(&[]).is_empty());
    }
}
