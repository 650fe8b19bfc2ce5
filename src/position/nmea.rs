//! NMEA 0183 position sentences.
//!
//! Only `GGA` and `RMC` carry what the alert path needs; both are accepted from
//! any talker (`$GP`, `$GN`, `$GL`, ...). Anything else parses to `None`.

use super::PositionFix;

/// Parses one line. `None` for unrelated, malformed or checksum-failing sentences.
pub fn parse_sentence(line: &str) -> Option<PositionFix> {
    let body = line.trim().strip_prefix('$')?;
    let body = match body.split_once('*') {
        Some((payload, checksum)) => {
            if !checksum_matches(payload, checksum) {
                log::debug!("nmea: checksum mismatch in {:?}", line.trim());
                return None;
            }
            payload
        }
        None => body,
    };

    let fields: Vec<&str> = body.split(',').collect();
    let address = fields.first()?;
    if address.len() != 5 || !address.is_ascii() {
        return None;
    }
    match &address[2..] {
        "GGA" => parse_gga(&fields),
        "RMC" => parse_rmc(&fields),
        _ => None,
    }
}

// $xxGGA,time,lat,N,lon,E,quality,sats,hdop,alt,M,geoid,M,age,station
fn parse_gga(fields: &[&str]) -> Option<PositionFix> {
    if fields.len() < 7 {
        return None;
    }
    let latitude = coordinate(fields[2], fields[3], 2)?;
    let longitude = coordinate(fields[4], fields[5], 3)?;
    let quality: u8 = match fields[6].trim() {
        "" => 0,
        q => q.parse().ok()?,
    };
    Some(PositionFix::new(latitude, longitude, quality != 0))
}

// $xxRMC,time,status,lat,N,lon,E,speed,course,date,magvar,E
fn parse_rmc(fields: &[&str]) -> Option<PositionFix> {
    if fields.len() < 7 {
        return None;
    }
    let valid = fields[2].trim().eq_ignore_ascii_case("A");
    let latitude = coordinate(fields[3], fields[4], 2)?;
    let longitude = coordinate(fields[5], fields[6], 3)?;
    Some(PositionFix::new(latitude, longitude, valid))
}

/// `ddmm.mmmm` (or `dddmm.mmmm`) plus hemisphere to signed decimal degrees.
/// An empty value is the not-acquired sentinel 0.0.
fn coordinate(value: &str, hemisphere: &str, degree_digits: usize) -> Option<f64> {
    let value = value.trim();
    if value.is_empty() {
        return Some(0.0);
    }
    if value.len() < degree_digits || !value.is_char_boundary(degree_digits) {
        return None;
    }
    let (degrees, minutes) = value.split_at(degree_digits);
    let degrees: f64 = degrees.parse().ok()?;
    let minutes: f64 = if minutes.is_empty() {
        0.0
    } else {
        minutes.parse().ok()?
    };
    if !(0.0..60.0).contains(&minutes) {
        return None;
    }
    let magnitude = degrees + minutes / 60.0;
    match hemisphere.trim() {
        "N" | "E" => Some(magnitude),
        "S" | "W" => Some(-magnitude),
        "" if magnitude == 0.0 => Some(0.0),
        _ => None,
    }
}

fn checksum_matches(payload: &str, checksum: &str) -> bool {
    let Ok(expected) = u8::from_str_radix(checksum.trim(), 16) else {
        return false;
    };
    payload.bytes().fold(0u8, |acc, b| acc ^ b) == expected
}
