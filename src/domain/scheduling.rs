use chrono::{DateTime, DurationRound, TimeDelta, Utc};

// ============================================================================
// Scheduling Propagation
// ============================================================================
//
// Parents derive their start/end/scheduled times from their children.
// Missing values are excluded from the comparison, so one known value among
// unknown siblings still wins.
//
// ============================================================================

/// Smallest selected value among the items passing `filter`, ignoring `None`.
pub fn min_value<'a, T, V, F, S>(items: impl IntoIterator<Item = &'a T>, filter: F, selector: S) -> Option<V>
where
    T: 'a,
    V: Ord,
    F: Fn(&T) -> bool,
    S: Fn(&T) -> Option<V>,
{
    items
        .into_iter()
        .filter(|item| filter(item))
        .filter_map(|item| selector(item))
        .min()
}

/// Largest selected value among the items passing `filter`, ignoring `None`.
pub fn max_value<'a, T, V, F, S>(items: impl IntoIterator<Item = &'a T>, filter: F, selector: S) -> Option<V>
where
    T: 'a,
    V: Ord,
    F: Fn(&T) -> bool,
    S: Fn(&T) -> Option<V>,
{
    items
        .into_iter()
        .filter(|item| filter(item))
        .filter_map(|item| selector(item))
        .max()
}

pub fn truncate_to_minute(time: DateTime<Utc>) -> DateTime<Utc> {
    time.duration_trunc(TimeDelta::minutes(1)).unwrap_or(time)
}

pub fn shift(time: Option<DateTime<Utc>>, minutes: i64) -> Option<DateTime<Utc>> {
    time.map(|t| t + TimeDelta::minutes(minutes))
}
