//! Civil-time helpers. Timestamps are stored as naive UTC; calendar keys,
//! cutoffs and displayed times are derived in the brand's local time zone
//! (falling back to the deployment zone).

use chrono::{NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::db::models::Brand;

/// The effective zone for a brand: its own, when present and parseable.
pub fn brand_tz(brand: Option<&Brand>, default: Tz) -> Tz {
    brand
        .and_then(|b| b.timezone.as_deref())
        .and_then(|name| name.parse::<Tz>().ok())
        .unwrap_or(default)
}

/// `yyyy-MM-dd` calendar key of a UTC instant in the given zone.
pub fn date_key(utc: NaiveDateTime, tz: Tz) -> String {
    Utc.from_utc_datetime(&utc)
        .with_timezone(&tz)
        .format("%Y-%m-%d")
        .to_string()
}

/// `yyyy-MM` calendar key of a UTC instant in the given zone.
pub fn month_key(utc: NaiveDateTime, tz: Tz) -> String {
    Utc.from_utc_datetime(&utc)
        .with_timezone(&tz)
        .format("%Y-%m")
        .to_string()
}

/// `HH:mm` wall-clock rendering of a UTC instant in the given zone.
pub fn time_hm(utc: NaiveDateTime, tz: Tz) -> String {
    Utc.from_utc_datetime(&utc)
        .with_timezone(&tz)
        .format("%H:%M")
        .to_string()
}

/// End of the current local day (23:59:59.999) as a naive UTC instant. Used
/// as the fan-out cutoff.
pub fn end_of_local_day(now_utc: NaiveDateTime, tz: Tz) -> NaiveDateTime {
    let local_date = Utc.from_utc_datetime(&now_utc).with_timezone(&tz).date_naive();
    let local_eod = local_date
        .and_hms_milli_opt(23, 59, 59, 999)
        .unwrap_or_else(|| local_date.and_hms_opt(23, 59, 59).unwrap());

    // DST transitions can make a local time ambiguous or skipped; either
    // candidate is an acceptable cutoff for a daily batch.
    match tz.from_local_datetime(&local_eod).earliest() {
        Some(t) => t.naive_utc(),
        None => now_utc,
    }
}
