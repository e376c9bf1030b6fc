use chrono::{Local, NaiveDateTime};
use log::debug;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

fn all_digits(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

/// Parse values like `001234.567*kWh`. The number must be `digits.digits`
/// and the unit after `*` must be exactly `unit`.
pub fn parse_decimal(value: &str, unit: &str) -> Option<f64> {
    let (number, value_unit) = value.split_once('*')?;
    if value_unit != unit {
        return None;
    }

    let (whole, fraction) = number.split_once('.')?;
    if !all_digits(whole) || !all_digits(fraction) {
        return None;
    }

    number.parse::<f64>().ok()
}

/// Switch positions are bare digits without a unit.
pub fn parse_integer(value: &str) -> Option<i64> {
    if !all_digits(value) {
        return None;
    }
    value.parse::<i64>().ok()
}

/// Tariff indicators come as `0001`/`0002` or, on some meters, `0012`;
/// in both cases only the last digit counts.
pub fn parse_tariff(value: &str) -> Option<u32> {
    if value.len() != 4 || !all_digits(value) {
        return None;
    }

    let tariff = value.parse::<u32>().ok()?;
    if tariff < 10 {
        Some(tariff)
    } else {
        Some(tariff % 10)
    }
}

/// Equipment identifiers are sent hex encoded, fall back to the raw string
/// when the value is not hex encoded ASCII.
pub fn decode_hex_serial(value: &str) -> String {
    match hex::decode(value) {
        Ok(bytes) if bytes.is_ascii() => bytes.into_iter().map(char::from).collect(),
        _ => {
            debug!("Serial {value} is not hex encoded ASCII, keeping it as is");
            value.to_string()
        }
    }
}

/// Convert the meter clock `YYMMDDhhmmssX` (X = W winter / S summer) to ISO-8601.
pub fn parse_telegram_timestamp(value: &str) -> Option<String> {
    if value.len() != 13 || !value.is_ascii() {
        return None;
    }

    let (digits, dst) = value.split_at(12);
    if dst != "W" && dst != "S" {
        return None;
    }

    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    NaiveDateTime::parse_from_str(&format!("20{digits}"), "%Y%m%d%H%M%S")
        .ok()
        .map(|ts| ts.format(TIMESTAMP_FORMAT).to_string())
}

pub fn now_timestamp() -> String {
    Local::now().naive_local().format(TIMESTAMP_FORMAT).to_string()
}
