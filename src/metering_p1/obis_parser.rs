use log::{debug, warn};

use super::{framer::END_MARKER, utils};
use crate::models::MeterReading;

/// How the raw text between the parentheses is turned into a value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Conversion {
    /// `digits.digits*unit` with the given unit
    Decimal(&'static str),
    Integer,
    Tariff,
    HexSerial,
    Timestamp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Decimal(f64),
    Integer(i64),
    Tariff(u32),
    Text(String),
}

impl Conversion {
    pub fn convert(&self, raw: &str) -> Option<FieldValue> {
        match self {
            Conversion::Decimal(unit) => utils::parse_decimal(raw, unit).map(FieldValue::Decimal),
            Conversion::Integer => utils::parse_integer(raw).map(FieldValue::Integer),
            Conversion::Tariff => utils::parse_tariff(raw).map(FieldValue::Tariff),
            Conversion::HexSerial => Some(FieldValue::Text(utils::decode_hex_serial(raw))),
            Conversion::Timestamp => utils::parse_telegram_timestamp(raw).map(FieldValue::Text),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReadingField {
    Timestamp,
    CurrentConsumptionKw,
    CurrentProductionKw,
    L1ConsumptionKw,
    L2ConsumptionKw,
    L3ConsumptionKw,
    L1ProductionKw,
    L2ProductionKw,
    L3ProductionKw,
    TotalConsumptionDayKwh,
    TotalConsumptionNightKwh,
    TotalProductionDayKwh,
    TotalProductionNightKwh,
    CurrentTariff,
    L1VoltageV,
    L2VoltageV,
    L3VoltageV,
    L1CurrentA,
    L2CurrentA,
    L3CurrentA,
    SwitchElectricity,
    SwitchGas,
    MeterSerialElectricity,
    MeterSerialGas,
    GasConsumptionM3,
}

impl ReadingField {
    fn decimal_slot<'a>(&self, reading: &'a mut MeterReading) -> Option<&'a mut f64> {
        let slot = match self {
            ReadingField::CurrentConsumptionKw => &mut reading.current_consumption_kw,
            ReadingField::CurrentProductionKw => &mut reading.current_production_kw,
            ReadingField::L1ConsumptionKw => &mut reading.l1_consumption_kw,
            ReadingField::L2ConsumptionKw => &mut reading.l2_consumption_kw,
            ReadingField::L3ConsumptionKw => &mut reading.l3_consumption_kw,
            ReadingField::L1ProductionKw => &mut reading.l1_production_kw,
            ReadingField::L2ProductionKw => &mut reading.l2_production_kw,
            ReadingField::L3ProductionKw => &mut reading.l3_production_kw,
            ReadingField::TotalConsumptionDayKwh => &mut reading.total_consumption_day_kwh,
            ReadingField::TotalConsumptionNightKwh => &mut reading.total_consumption_night_kwh,
            ReadingField::TotalProductionDayKwh => &mut reading.total_production_day_kwh,
            ReadingField::TotalProductionNightKwh => &mut reading.total_production_night_kwh,
            ReadingField::L1VoltageV => &mut reading.l1_voltage_v,
            ReadingField::L2VoltageV => &mut reading.l2_voltage_v,
            ReadingField::L3VoltageV => &mut reading.l3_voltage_v,
            ReadingField::L1CurrentA => &mut reading.l1_current_a,
            ReadingField::L2CurrentA => &mut reading.l2_current_a,
            ReadingField::L3CurrentA => &mut reading.l3_current_a,
            ReadingField::GasConsumptionM3 => &mut reading.gas_consumption_m3,
            _ => return None,
        };
        Some(slot)
    }

    /// Store a converted value, returns false if the value type does not fit the field.
    pub fn assign(&self, reading: &mut MeterReading, value: FieldValue) -> bool {
        match (self, value) {
            (ReadingField::Timestamp, FieldValue::Text(v)) => reading.timestamp = v,
            (ReadingField::CurrentTariff, FieldValue::Tariff(v)) => reading.current_tariff = v,
            (ReadingField::SwitchElectricity, FieldValue::Integer(v)) => reading.switch_electricity = v,
            (ReadingField::SwitchGas, FieldValue::Integer(v)) => reading.switch_gas = v,
            (ReadingField::MeterSerialElectricity, FieldValue::Text(v)) => reading.meter_serial_electricity = v,
            (ReadingField::MeterSerialGas, FieldValue::Text(v)) => reading.meter_serial_gas = v,
            (field, FieldValue::Decimal(v)) => match field.decimal_slot(reading) {
                Some(slot) => *slot = v,
                None => return false,
            },
            _ => return false,
        }
        true
    }
}

/// One entry of the decode table.
#[derive(Debug)]
pub struct ObisRule {
    pub code: &'static str,
    pub field: ReadingField,
    pub conversion: Conversion,
    /// Index of the parenthesised group holding the value
    pub group: usize,
}

const fn rule(code: &'static str, field: ReadingField, conversion: Conversion) -> ObisRule {
    ObisRule { code, field, conversion, group: 0 }
}

pub static OBIS_RULES: &[ObisRule] = &[
    rule("0-0:1.0.0", ReadingField::Timestamp, Conversion::Timestamp),

    rule("1-0:1.7.0", ReadingField::CurrentConsumptionKw, Conversion::Decimal("kW")),
    rule("1-0:2.7.0", ReadingField::CurrentProductionKw, Conversion::Decimal("kW")),
    rule("1-0:21.7.0", ReadingField::L1ConsumptionKw, Conversion::Decimal("kW")),
    rule("1-0:41.7.0", ReadingField::L2ConsumptionKw, Conversion::Decimal("kW")),
    rule("1-0:61.7.0", ReadingField::L3ConsumptionKw, Conversion::Decimal("kW")),
    rule("1-0:22.7.0", ReadingField::L1ProductionKw, Conversion::Decimal("kW")),
    rule("1-0:42.7.0", ReadingField::L2ProductionKw, Conversion::Decimal("kW")),
    rule("1-0:62.7.0", ReadingField::L3ProductionKw, Conversion::Decimal("kW")),

    rule("1-0:1.8.1", ReadingField::TotalConsumptionDayKwh, Conversion::Decimal("kWh")),
    rule("1-0:1.8.2", ReadingField::TotalConsumptionNightKwh, Conversion::Decimal("kWh")),
    rule("1-0:2.8.1", ReadingField::TotalProductionDayKwh, Conversion::Decimal("kWh")),
    rule("1-0:2.8.2", ReadingField::TotalProductionNightKwh, Conversion::Decimal("kWh")),

    rule("0-0:96.14.0", ReadingField::CurrentTariff, Conversion::Tariff),
    rule("1-0:32.7.0", ReadingField::L1VoltageV, Conversion::Decimal("V")),
    rule("1-0:52.7.0", ReadingField::L2VoltageV, Conversion::Decimal("V")),
    rule("1-0:72.7.0", ReadingField::L3VoltageV, Conversion::Decimal("V")),
    rule("1-0:31.7.0", ReadingField::L1CurrentA, Conversion::Decimal("A")),
    rule("1-0:51.7.0", ReadingField::L2CurrentA, Conversion::Decimal("A")),
    rule("1-0:71.7.0", ReadingField::L3CurrentA, Conversion::Decimal("A")),

    rule("0-0:96.3.10", ReadingField::SwitchElectricity, Conversion::Integer),
    rule("0-1:24.4.0", ReadingField::SwitchGas, Conversion::Integer),

    rule("0-0:96.1.1", ReadingField::MeterSerialElectricity, Conversion::HexSerial),
    rule("0-1:96.1.1", ReadingField::MeterSerialGas, Conversion::HexSerial),

    /* 0-1:24.2.3(capture time)(value*m3) */
    ObisRule { code: "0-1:24.2.3", field: ReadingField::GasConsumptionM3, conversion: Conversion::Decimal("m3"), group: 1 },
];

pub fn find_rule(code: &str) -> Option<&'static ObisRule> {
    OBIS_RULES.iter().find(|r| r.code == code)
}

/// Split `1-0:1.8.1(000123.456*kWh)` into the OBIS code and its value groups.
pub fn split_obis_line(line: &str) -> Option<(&str, Vec<&str>)> {
    let line = line.trim();
    let paren_start = line.find('(')?;
    let code = line[..paren_start].trim();
    if code.is_empty() {
        return None;
    }

    let mut groups = Vec::new();
    let mut rest = &line[paren_start..];
    while let Some(open) = rest.find('(') {
        let close = rest[open..].find(')')? + open;
        groups.push(&rest[open + 1..close]);
        rest = &rest[close + 1..];
    }

    Some((code, groups))
}

/// Decode a validated telegram. Never fails: codes that are missing or carry
/// values that do not convert leave their fields at the default.
pub fn decode(frame: &[u8]) -> MeterReading {
    let text = String::from_utf8_lossy(frame);
    let body = match text.find(END_MARKER as char) {
        Some(end) => &text[..end],
        None => &text[..],
    };

    let mut reading = MeterReading::default();
    let mut matched: Vec<&'static str> = Vec::new();

    for line in body.lines() {
        let (code, groups) = match split_obis_line(line) {
            Some(parts) => parts,
            None => continue,
        };

        let rule = match find_rule(code) {
            Some(rule) => rule,
            None => continue,
        };

        if matched.contains(&rule.code) {
            debug!("Ignoring repeated OBIS code {}", code);
            continue;
        }

        let raw = match groups.get(rule.group) {
            Some(raw) => *raw,
            None => {
                warn!("OBIS code {} has no value group {}", code, rule.group);
                continue;
            }
        };

        match rule.conversion.convert(raw) {
            Some(value) => {
                if rule.field.assign(&mut reading, value) {
                    matched.push(rule.code);
                } else {
                    warn!("OBIS rule for {} does not fit field {:?}", code, rule.field);
                }
            }
            None => warn!("Unable to convert value '{}' of OBIS code {}", raw, code),
        }
    }

    if reading.timestamp.is_empty() {
        reading.timestamp = utils::now_timestamp();
    }

    debug!("Decoded telegram with {} known OBIS codes", matched.len());
    reading
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    const FULL_TELEGRAM: &[u8] = b"/ISK5\\2M550E-1012\r\n\r\n\
1-3:0.2.8(50)\r\n\
0-0:1.0.0(240115103000W)\r\n\
0-0:96.1.1(4530303434303037313439363633373139)\r\n\
1-0:1.8.1(001234.567*kWh)\r\n\
1-0:1.8.2(002345.678*kWh)\r\n\
1-0:2.8.1(000123.456*kWh)\r\n\
1-0:2.8.2(000012.345*kWh)\r\n\
0-0:96.14.0(0001)\r\n\
1-0:1.7.0(00.512*kW)\r\n\
1-0:2.7.0(00.000*kW)\r\n\
0-0:96.3.10(1)\r\n\
1-0:32.7.0(230.1*V)\r\n\
1-0:52.7.0(231.2*V)\r\n\
1-0:72.7.0(229.8*V)\r\n\
1-0:31.7.0(002.00*A)\r\n\
1-0:51.7.0(001.00*A)\r\n\
1-0:71.7.0(000.00*A)\r\n\
1-0:21.7.0(00.300*kW)\r\n\
1-0:41.7.0(00.212*kW)\r\n\
1-0:61.7.0(00.000*kW)\r\n\
1-0:22.7.0(00.000*kW)\r\n\
1-0:42.7.0(00.000*kW)\r\n\
1-0:62.7.0(00.000*kW)\r\n\
0-1:24.1.0(003)\r\n\
0-1:96.1.1(4730303339303031373030343630313137)\r\n\
0-1:24.4.0(1)\r\n\
0-1:24.2.3(240115102500W)(01234.567*m3)\r\n\
!4D0D";

    #[test]
    fn test_split_obis_line() {
        let (code, groups) = split_obis_line("1-0:1.8.1(000123.456*kWh)").unwrap();
        assert_eq!(code, "1-0:1.8.1");
        assert_eq!(groups, vec!["000123.456*kWh"]);

        let (code, groups) = split_obis_line(" 0-1:24.2.3(240115102500W)(01234.567*m3)\r").unwrap();
        assert_eq!(code, "0-1:24.2.3");
        assert_eq!(groups, vec!["240115102500W", "01234.567*m3"]);

        assert!(split_obis_line("/ISK5\\2M550E-1012").is_none());
        assert!(split_obis_line("(12)").is_none());
        assert!(split_obis_line("1-0:1.8.1(000123").is_none());
    }

    #[test]
    fn test_table_codes_are_unique() {
        for (i, rule) in OBIS_RULES.iter().enumerate() {
            assert!(OBIS_RULES[i + 1..].iter().all(|r| r.code != rule.code), "{} listed twice", rule.code);
        }
    }

    #[test]
    fn test_decode_full_telegram() {
        let reading = decode(FULL_TELEGRAM);

        assert_eq!(reading.timestamp, "2024-01-15T10:30:00");
        assert_eq!(reading.current_consumption_kw, 0.512);
        assert_eq!(reading.current_production_kw, 0.0);
        assert_eq!(reading.l1_consumption_kw, 0.3);
        assert_eq!(reading.l2_consumption_kw, 0.212);
        assert_eq!(reading.total_consumption_day_kwh, 1234.567);
        assert_eq!(reading.total_consumption_night_kwh, 2345.678);
        assert_eq!(reading.total_production_day_kwh, 123.456);
        assert_eq!(reading.total_production_night_kwh, 12.345);
        assert_eq!(reading.current_tariff, 1);
        assert_eq!(reading.l1_voltage_v, 230.1);
        assert_eq!(reading.l2_voltage_v, 231.2);
        assert_eq!(reading.l3_voltage_v, 229.8);
        assert_eq!(reading.l1_current_a, 2.0);
        assert_eq!(reading.l2_current_a, 1.0);
        assert_eq!(reading.switch_electricity, 1);
        assert_eq!(reading.switch_gas, 1);
        assert_eq!(reading.meter_serial_electricity, "E0044007149663719");
        assert_eq!(reading.meter_serial_gas, "G0039001700460117");
        assert_eq!(reading.gas_consumption_m3, 1234.567);
    }

    #[test]
    fn test_decode_minimal_telegram() {
        let reading = decode(b"/ABC\r\n0-0:96.14.0(0002)\r\n1-0:1.7.0(01.234*kW)\r\n!46E7");
        assert_eq!(reading.current_tariff, 2);
        assert_eq!(reading.current_consumption_kw, 1.234);
        assert_eq!(reading.gas_consumption_m3, 0.0);
        assert_eq!(reading.meter_serial_electricity, "");
        assert!(!reading.timestamp.is_empty());
    }

    #[test]
    fn test_missing_tags_keep_defaults() {
        let reading = decode(b"/ABC\r\n1-0:32.7.0(230.1*V)\r\n!0000");
        let expected = MeterReading {
            timestamp: reading.timestamp.clone(),
            l1_voltage_v: 230.1,
            ..Default::default()
        };
        assert_eq!(reading, expected);
    }

    #[test]
    fn test_decode_is_idempotent() {
        assert_eq!(decode(FULL_TELEGRAM), decode(FULL_TELEGRAM));
    }

    #[test]
    fn test_bad_values_are_skipped() {
        let reading = decode(b"/ABC\r\n\
0-0:1.0.0(2401151030W)\r\n\
1-0:1.7.0(abc*kW)\r\n\
0-0:96.14.0(00X2)\r\n\
0-0:96.1.1(4G30)\r\n\
0-1:24.2.3(01234.567*m3)\r\n\
!0000");
        assert_eq!(reading.current_consumption_kw, 0.0);
        assert_eq!(reading.current_tariff, 0);
        assert_eq!(reading.meter_serial_electricity, "4G30");
        assert_eq!(reading.gas_consumption_m3, 0.0);
        assert!(utils::parse_telegram_timestamp("2401151030W").is_none());

        /* Wall clock instead of the meter clock */
        assert!(NaiveDateTime::parse_from_str(&reading.timestamp, utils::TIMESTAMP_FORMAT).is_ok());
    }

    #[test]
    fn test_non_meter_numbers_are_skipped() {
        let telegram: &[u8] = b"/ABC\r\n\
0-0:1.0.0(240115103000W)\r\n\
1-0:1.7.0(NaN*kW)\r\n\
1-0:2.7.0(1234*W)\r\n\
1-0:1.8.1(-5e3*Wh)\r\n\
1-0:32.7.0(inf*V)\r\n\
0-0:96.14.0(123456)\r\n\
0-0:96.3.10(-1)\r\n\
!0000";
        let reading = decode(telegram);
        assert_eq!(reading, MeterReading::new("2024-01-15T10:30:00".to_string()));
        assert_eq!(decode(telegram), reading);

        let json = serde_json::to_value(&reading).unwrap();
        assert_eq!(json["current_consumption_kw"], 0.0);
    }

    #[test]
    fn test_value_with_wrong_unit_is_skipped() {
        let reading = decode(b"/ABC\r\n1-0:1.7.0(01.234*kWh)\r\n1-0:1.8.1(001234.567*kWh)\r\n!0000");
        assert_eq!(reading.current_consumption_kw, 0.0);
        assert_eq!(reading.total_consumption_day_kwh, 1234.567);
    }

    #[test]
    fn test_first_occurrence_wins() {
        let reading = decode(b"/ABC\r\n1-0:1.7.0(01.000*kW)\r\n1-0:1.7.0(02.000*kW)\r\n!0000");
        assert_eq!(reading.current_consumption_kw, 1.0);
    }

    #[test]
    fn test_unknown_codes_ignored() {
        let reading = decode(b"/ABC\r\n1-0:99.97.0(1)(0-0:96.7.19)(000101000001W)(2147483647*s)\r\n1-0:21.7.0(00.100*kW)\r\n!0000");
        assert_eq!(reading.l1_consumption_kw, 0.1);
    }

    #[test]
    fn test_assign_rejects_mismatched_value() {
        let mut reading = MeterReading::default();
        assert!(!ReadingField::CurrentTariff.assign(&mut reading, FieldValue::Decimal(1.0)));
        assert!(!ReadingField::Timestamp.assign(&mut reading, FieldValue::Integer(1)));
        assert!(ReadingField::GasConsumptionM3.assign(&mut reading, FieldValue::Decimal(3.5)));
        assert_eq!(reading.gas_consumption_m3, 3.5);
    }
}
