use chrono::{DateTime, Datelike, Utc};

pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// Current UTC year, used as the default partition for new DocIds.
pub fn current_year() -> i32 {
    Utc::now().year()
}
