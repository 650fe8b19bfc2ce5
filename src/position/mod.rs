//! Position fixes from the satellite receiver.

pub mod nmea;
mod receiver;

use std::fmt;

use anyhow::Result;

pub use receiver::NmeaReceiver;

/// One reported position.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PositionFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Receiver-reported validity (GGA quality > 0, RMC status `A`).
    pub valid: bool,
}

impl PositionFix {
    pub fn new(latitude: f64, longitude: f64, valid: bool) -> Self {
        Self {
            latitude,
            longitude,
            valid,
        }
    }

    /// Usable for dedup and alerts: reported valid and not the 0,0 sentinel.
    pub fn is_usable(&self) -> bool {
        self.valid
            && self.latitude.is_finite()
            && self.longitude.is_finite()
            && !(self.latitude == 0.0 && self.longitude == 0.0)
    }

    pub fn location_key(&self) -> LocationKey {
        LocationKey::from_fix(self)
    }
}

/// Dedup identity of a fix: latitude and longitude rounded to 6 decimals.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LocationKey(String);

impl LocationKey {
    pub fn from_fix(fix: &PositionFix) -> Self {
        Self(format!(
            "{},{}",
            key_component(fix.latitude),
            key_component(fix.longitude)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Six decimals; values that round to zero lose their sign.
fn key_component(degrees: f64) -> String {
    let text = format!("{:.6}", degrees);
    match text.strip_prefix('-') {
        Some(magnitude) if magnitude.bytes().all(|b| b == b'0' || b == b'.') => {
            magnitude.to_string()
        }
        _ => text,
    }
}

impl fmt::Display for LocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source of position fixes.
///
/// `poll_fix` blocks for at most one read timeout of the underlying channel.
/// `Ok(None)` means nothing parseable arrived (timeout, unrelated or malformed
/// sentence); callers poll again. `Err` means the channel is gone.
pub trait PositionReader: Send {
    fn poll_fix(&mut self) -> Result<Option<PositionFix>>;
}

impl<T: PositionReader + ?Sized> PositionReader for Box<T> {
    fn poll_fix(&mut self) -> Result<Option<PositionFix>> {
        (**self).poll_fix()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sentinel_is_not_usable() {
        assert!(!PositionFix::new(0.0, 0.0, true).is_usable());
        assert!(!PositionFix::new(44.4, 26.1, false).is_usable());
        assert!(PositionFix::new(0.0, 26.1, true).is_usable());
    }

    #[test]
    fn key_rounds_to_six_decimals() {
        let a = PositionFix::new(44.433_107_14, 26.058_457_9, true);
        let b = PositionFix::new(44.433_107_09, 26.058_457_92, true);
        assert_eq!(a.location_key().as_str(), "44.433107,26.058458");
        assert_eq!(a.location_key(), b.location_key());
        assert_ne!(
            a.location_key(),
            PositionFix::new(44.433_108, 26.058_458, true).location_key()
        );
    }

    #[test]
    fn values_rounding_to_zero_share_one_key() {
        let west = PositionFix::new(51.477_928, -0.000_000_1, true);
        let east = PositionFix::new(51.477_928, 0.000_000_1, true);
        assert_eq!(west.location_key().as_str(), "51.477928,0.000000");
        assert_eq!(west.location_key(), east.location_key());
        assert_eq!(
            PositionFix::new(-0.000_000_4, -0.5, true).location_key().as_str(),
            "0.000000,-0.500000"
        );
    }
}
