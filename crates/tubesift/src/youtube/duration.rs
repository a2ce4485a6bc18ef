//! ISO-8601 period parsing for the `contentDetails.duration` field.

use std::sync::LazyLock;

use regex::Regex;

static PERIOD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^PT(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?$").expect("period regex")
});

/// `PT[nH][nM][nS]` → seconds; missing components default to 0, so a bare
/// `PT` is 0. Anything else is unparseable.
pub fn parse_period_seconds(raw: &str) -> Option<u64> {
    let caps = PERIOD_RE.captures(raw.trim())?;
    let component = |i: usize| -> u64 {
        caps.get(i)
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .unwrap_or(0)
    };
    Some(component(1) * 3600 + component(2) * 60 + component(3))
}
