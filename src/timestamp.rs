//! ISO-8601 timestamps for container log framing.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Local, Timelike};

/// A wall-clock instant captured at construction, rendered as
/// `YYYY-MM-DDTHH:MM:SS.<9-digit-nanos>Z` using local time.
///
/// The trailing `Z` combined with local time mislabels non-UTC deployments;
/// the kubelet tolerates it and downstream tooling expects the existing
/// format, so it is kept as-is.
pub struct Iso8601Timestamp(DateTime<Local>);

impl Iso8601Timestamp {
    pub fn now() -> Self {
        Self(Local::now())
    }
}

impl Display for Iso8601Timestamp {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> FmtResult {
        write!(
            formatter,
            "{}.{:09}Z",
            self.0.format("%Y-%m-%dT%H:%M:%S"),
            self.0.nanosecond()
        )
    }
}

/// Current wall-clock time in nanoseconds since the epoch, the unit the CRI
/// reports every `created_at`/`started_at`/`finished_at` in.
pub(crate) fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_nanos() as i64)
}

#[cfg(test)]
mod tests {
    use lazy_static::lazy_static;
    use regex::Regex;

    use super::*;

    lazy_static! {
        static ref TIMESTAMP_RE: Regex =
            Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.\d{9}Z$").unwrap();
    }

    #[test]
    fn renders_with_nanosecond_precision() {
        let rendered = Iso8601Timestamp::now().to_string();
        assert!(
            TIMESTAMP_RE.is_match(&rendered),
            "unexpected timestamp format: {rendered}"
        );
    }

    #[test]
    fn now_nanos_is_positive() {
        assert!(now_nanos() > 0);
    }
}
