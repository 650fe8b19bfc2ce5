use std::sync::OnceLock;

use regex::Regex;

use crate::position::LocationKey;

/// Fills `{label}` and `{location}` in an alert template.
pub fn format_message(template: &str, label: &str, location: &LocationKey) -> String {
    template
        .replace("{label}", label)
        .replace("{location}", location.as_str())
}

/// Extracts the first `lat,lon` pair from a received alert text.
///
/// Matches what the receiving phone app looks for, so any template containing
/// `{location}` round-trips.
pub fn parse_alert_location(text: &str) -> Option<(f64, f64)> {
    static COORDS_RE: OnceLock<Regex> = OnceLock::new();
    let re = COORDS_RE.get_or_init(|| Regex::new(r"(-?\d+\.\d+),\s*(-?\d+\.\d+)").unwrap());
    let caps = re.captures(text)?;
    let latitude = caps.get(1)?.as_str().parse().ok()?;
    let longitude = caps.get(2)?.as_str().parse().ok()?;
    Some((latitude, longitude))
}
