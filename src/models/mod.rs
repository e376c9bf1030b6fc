use serde::{Deserialize, Serialize};

/// One decoded P1 telegram.
///
/// Every field has a zero/empty default, so a telegram that lacks some OBIS
/// codes still yields a complete reading. A reading is never modified after
/// decoding; newer telegrams replace it as a whole.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
pub struct MeterReading {
    /// Meter clock (0-0:1.0.0) or wall clock at decode time, ISO-8601
    pub timestamp: String,

    // Instantaneous power
    pub current_consumption_kw: f64,
    pub current_production_kw: f64,
    pub l1_consumption_kw: f64,
    pub l2_consumption_kw: f64,
    pub l3_consumption_kw: f64,
    pub l1_production_kw: f64,
    pub l2_production_kw: f64,
    pub l3_production_kw: f64,

    // Cumulative energy per tariff period
    pub total_consumption_day_kwh: f64,
    pub total_consumption_night_kwh: f64,
    pub total_production_day_kwh: f64,
    pub total_production_night_kwh: f64,

    /// 1 = day, 2 = night
    pub current_tariff: u32,
    pub l1_voltage_v: f64,
    pub l2_voltage_v: f64,
    pub l3_voltage_v: f64,
    pub l1_current_a: f64,
    pub l2_current_a: f64,
    pub l3_current_a: f64,

    // Breaker / valve position
    pub switch_electricity: i64,
    pub switch_gas: i64,

    pub meter_serial_electricity: String,
    pub meter_serial_gas: String,

    pub gas_consumption_m3: f64,
}

impl MeterReading {
    pub fn new(timestamp: String) -> Self {
        MeterReading {
            timestamp,
            ..Default::default()
        }
    }
}
