use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

/// Matches `stat_<sensor>_<fn>_<window>` identifiers inside a rule's
/// condition or target formula, e.g. `stat_boiler_temp_mean_5m`.
fn stat_ident_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"stat_(?P<sensor>[A-Za-z0-9]+(?:_[A-Za-z0-9]+)*?)_(?P<func>mean|min|max|stddev|count)_(?P<window>\d+)(?P<unit>s|m|h)").unwrap()
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatRef {
    pub identifier: String,
    pub sensor_name: String,
    pub function: String,
    pub window: Duration,
}

/// Extracts every distinct stats-cache reference out of an
/// expression. Used by the periodic stats-refresh task to know which
/// (sensor, function, window) triples to query.
pub fn extract_stat_refs(expr: &str) -> Vec<StatRef> {
    stat_ident_pattern()
        .captures_iter(expr)
        .map(|caps| {
            let amount: u64 = caps["window"].parse().unwrap_or(0);
            let unit = &caps["unit"];
            let window = match unit {
                "s" => Duration::from_secs(amount),
                "m" => Duration::from_secs(amount * 60),
                "h" => Duration::from_secs(amount * 3600),
                _ => Duration::from_secs(amount),
            };
            StatRef {
                identifier: caps[0].to_string(),
                sensor_name: caps["sensor"].to_string(),
                function: caps["func"].to_string(),
                window,
            }
        })
        .collect()
}
