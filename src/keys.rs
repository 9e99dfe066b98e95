//! Object key generation.
//!
//! Temporary keys:  `{namespace}/tmp-{unix_millis}-{rand 0..999}.{ext}`
//! Final keys:      `{year}/{month}/{day}/{sha1_hex}.{ext}`
//!
//! No component is zero-padded, so callers must not assume fixed-width
//! fields when parsing keys back.

use chrono::{Datelike, Local, NaiveDate, Utc};
use rand::Rng;

use crate::digest::ContentDigest;

/// Date bucket for `date` in the form `Y/M/D/`.
pub fn bucket_path_for_date(date: NaiveDate) -> String {
    format!("{}/{}/{}/", date.year(), date.month(), date.day())
}

/// Today's date in the process's local timezone.
pub fn local_today() -> NaiveDate {
    Local::now().date_naive()
}

/// Generate a fresh temporary key under `namespace`.
///
/// Uniqueness is best effort: wall-clock milliseconds plus a value in
/// `0..1000`.
pub fn temporary_key(namespace: &str, extension: &str) -> String {
    let millis = Utc::now().timestamp_millis();
    let suffix: u16 = rand::thread_rng().gen_range(0..1000);
    format!("{namespace}/tmp-{millis}-{suffix}.{extension}")
}

/// Content-addressed key for `digest` bucketed under `date`.
pub fn final_key(date: NaiveDate, digest: &ContentDigest, extension: &str) -> String {
    format!("{}{}.{}", bucket_path_for_date(date), digest.to_hex(), extension)
}
