//! Cron source parsing.
//!
//! Each significant line of the source reads `<cron-expression> <url>`. The
//! URL is the last whitespace-separated token and the expression is
//! everything before it, so expressions may contain any number of fields.

use crate::error::{DispatchError, DispatchResult};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::str::FromStr;

/// One scheduled callback.
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    expression: String,
    url: String,
    schedule: ::cron::Schedule,
}

impl ScheduleEntry {
    /// Parse a single schedule line.
    pub fn parse_line(line: &str) -> DispatchResult<Self> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some((url, fields)) = tokens.split_last() else {
            return Err(parse_error(line, "empty line"));
        };
        if fields.is_empty() {
            return Err(parse_error(line, "expected '<cron-expression> <url>'"));
        }

        reqwest::Url::parse(url)
            .map_err(|e| parse_error(line, format!("invalid callback url '{url}': {e}")))?;

        let expression = fields.join(" ");
        let schedule = ::cron::Schedule::from_str(&normalize(fields))
            .map_err(|e| parse_error(line, format!("invalid cron expression: {e}")))?;

        Ok(Self {
            expression,
            url: (*url).to_string(),
            schedule,
        })
    }

    /// Cron expression as written.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Callback URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The schedule line, `<expression> <url>`.
    pub fn line(&self) -> String {
        format!("{} {}", self.expression, self.url)
    }

    /// First firing strictly after `after`.
    pub fn next_after(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(after).next()
    }
}

impl FromStr for ScheduleEntry {
    type Err = DispatchError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        Self::parse_line(line)
    }
}

/// Parse a whole cron source. Blank lines and `#` comments are skipped; the
/// first malformed line fails the whole source.
pub fn parse_source(source: &str) -> DispatchResult<Vec<ScheduleEntry>> {
    source
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ScheduleEntry::parse_line)
        .collect()
}

/// Read and parse the cron source at `path`. A missing or unreadable file
/// yields `None`; only a malformed source is an error.
pub async fn load(path: impl AsRef<Path>) -> DispatchResult<Option<Vec<ScheduleEntry>>> {
    let path = path.as_ref();

    let source = match tokio::fs::read_to_string(path).await {
        Ok(source) => source,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "Cannot read cron source, scheduler disabled");
            return Ok(None);
        }
    };

    let entries = parse_source(&source)?;
    tracing::debug!(path = %path.display(), entries = entries.len(), "Cron source loaded");
    Ok(Some(entries))
}

// The cron crate wants a seconds field; classic 5-field lines fire at second 0.
fn normalize(fields: &[&str]) -> String {
    match fields {
        [first, ..] if first.starts_with('@') => fields.join(" "),
        _ if fields.len() == 5 => format!("0 {}", fields.join(" ")),
        _ => fields.join(" "),
    }
}

fn parse_error(line: &str, message: impl Into<String>) -> DispatchError {
    DispatchError::ScheduleParse {
        line: line.to_string(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};
    use std::io::Write;

    #[test]
    fn test_parse_five_field_line() {
        let entry = ScheduleEntry::parse_line("*/5 * * * * http://host/cb").unwrap();
        assert_eq!(entry.expression(), "*/5 * * * *");
        assert_eq!(entry.url(), "http://host/cb");
        assert_eq!(entry.line(), "*/5 * * * * http://host/cb");

        let start = Utc.with_ymd_and_hms(2024, 1, 1, 10, 2, 30).unwrap();
        let next = entry.next_after(&start).unwrap();
        assert_eq!((next.hour(), next.minute(), next.second()), (10, 5, 0));
    }

    #[test]
    fn test_parse_preserves_expression_and_collapses_spacing() {
        let entry = ScheduleEntry::parse_line("  0  30 9 * * Mon-Fri   https://example.com/daily ").unwrap();
        assert_eq!(entry.expression(), "0 30 9 * * Mon-Fri");
        assert_eq!(entry.url(), "https://example.com/daily");
    }

    #[test]
    fn test_parse_descriptor() {
        let entry: ScheduleEntry = "@hourly http://host/hourly".parse().unwrap();
        assert_eq!(entry.expression(), "@hourly");
    }

    #[test]
    fn test_malformed_lines() {
        for line in [
            "http://host/cb",
            "not a cron http://host/cb",
            "*/5 * * * * not-a-url",
            "99 * * * * http://host/cb",
        ] {
            let err = ScheduleEntry::parse_line(line).unwrap_err();
            assert!(
                matches!(err, DispatchError::ScheduleParse { .. }),
                "{line}: {err}"
            );
        }
    }

    #[test]
    fn test_parse_source_skips_comments_and_blanks() {
        let entries = parse_source(
            "# nightly jobs\n\n0 0 * * * http://host/nightly\n   \n*/10 * * * * http://host/poll\n",
        )
        .unwrap();

        let urls: Vec<&str> = entries.iter().map(ScheduleEntry::url).collect();
        assert_eq!(urls, ["http://host/nightly", "http://host/poll"]);
    }

    #[test]
    fn test_parse_source_fails_on_first_bad_line() {
        let err = parse_source("0 0 * * * http://host/ok\nbroken\n").unwrap_err();
        match err {
            DispatchError::ScheduleParse { line, .. } => assert_eq!(line, "broken"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load(dir.path().join("tasks.cron")).await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_load_unreadable_source() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(dir.path()).await.unwrap().is_none());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0xff, 0xfe, 0x00]).unwrap();
        assert!(load(file.path()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "*/5 * * * * http://host/cb").unwrap();

        let entries = load(file.path()).await.unwrap().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].expression(), "*/5 * * * *");
    }

    #[tokio::test]
    async fn test_load_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "every five minutes http://host/cb").unwrap();

        assert!(load(file.path()).await.is_err());
    }
}
