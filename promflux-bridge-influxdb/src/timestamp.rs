//! Effective timestamp of a scrape.

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::flatten::FlatSampleSet;

/// Resolve the timestamp for a scrape.
///
/// With no designated field the wall clock `now` is used. A designated field
/// that is missing or not a usable epoch-seconds value falls back to `now`
/// with a warning; otherwise its value is used, truncated to whole seconds.
pub fn resolve_timestamp(
    fields: &FlatSampleSet,
    field_name: Option<&str>,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    let Some(name) = field_name else {
        return now;
    };

    match fields.get(name) {
        Some(value) => match value.as_epoch_seconds() {
            Some(timestamp) => timestamp,
            None => {
                warn!(
                    field = %name,
                    value = value.as_f64(),
                    "Timestamp field is not a Unix time, using current time"
                );
                now
            }
        },
        None => {
            warn!(field = %name, "Timestamp field not found, using current time");
            now
        }
    }
}
