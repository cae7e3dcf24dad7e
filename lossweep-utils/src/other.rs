//! Module containing some utility functions that didn't fit anywhere else.

use time::{format_description, OffsetDateTime};

/// Produces a timestamp `String` of the current time in YYYY-MM-DD_HH-mm-SS format.
pub fn get_timestamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    format_description::parse("[year]-[month]-[day]_[hour]-[minute]-[second]")
        .ok()
        .and_then(|format| now.format(&format).ok())
        .unwrap_or_else(|| now.unix_timestamp().to_string())
}

/// Replace the decimal point of a measured value so it can be embedded in a file name, e.g.
/// `31.730` becomes `31p730`.
pub fn filename_safe(value: impl AsRef<str>) -> String {
    value.as_ref().replace('.', "p")
}
