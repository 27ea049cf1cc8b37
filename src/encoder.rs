//! Encoders for Bluetooth SIG measurement characteristics.
//!
//! Every encoder is a pure function from typed arguments to a byte buffer. Multi-byte fields are
//! little-endian.

use crate::error::{Error, Result};

mod args;
pub use args::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoder {
    BloodPressure,
    PulseOximeter,
    WeightScale,
    BatteryLevel,
    HeartRate,
    Uint8,
    Uint16,
    Uint32,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WeightUnit {
    #[default]
    Kg,
    Lb,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BloodPressure {
    pub systolic: i64,
    pub diastolic: i64,
    pub pulse_rate: i64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PulseOximeter {
    pub spo2: i64,
    pub pulse_rate: i64,
    pub perfusion_index: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightScale {
    pub weight: f64,
    pub unit: WeightUnit,
}

/// Typed input of one encoder. `Raw` is what tokens parse into when no encoder of that name is
/// registered.
#[derive(Debug, Clone, PartialEq)]
pub enum EncoderArgs {
    BloodPressure(BloodPressure),
    PulseOximeter(PulseOximeter),
    WeightScale(WeightScale),
    BatteryLevel(i64),
    HeartRate(i64),
    Uint8(i64),
    Uint16(i64),
    Uint32(i64),
    Text(String),
    Raw(Vec<Token>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub example: &'static str,
}

/// Narrow an encoded field to its wire width, rejecting values that do not fit.
fn field<T: TryFrom<i64>>(name: &str, value: i64) -> Result<T> {
    T::try_from(value).map_err(|_| {
        Error::InvalidArgument(format!("{} out of range (encoded as {})", name, value))
    })
}

/// 16-bit IEEE-11073 short float with the exponent fixed at -1.
///
/// Only magnitudes that fit a 12 bit mantissa at one decimal are representable; the mantissa is
/// masked, not range checked.
pub fn sfloat(value: f64) -> u16 {
    if value == 0.0 {
        return 0x0000;
    }
    let mantissa = ((value * 10.0).round() as i64 & 0x0fff) as u16;
    let exponent = 0xfu16;
    (exponent << 12) | mantissa
}

impl Encoder {
    pub const ALL: [Encoder; 9] = [
        Encoder::BloodPressure,
        Encoder::PulseOximeter,
        Encoder::WeightScale,
        Encoder::BatteryLevel,
        Encoder::HeartRate,
        Encoder::Uint8,
        Encoder::Uint16,
        Encoder::Uint32,
        Encoder::Text,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|x| x.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Encoder::BloodPressure => "blood-pressure",
            Encoder::PulseOximeter => "pulse-oximeter",
            Encoder::WeightScale => "weight-scale",
            Encoder::BatteryLevel => "battery-level",
            Encoder::HeartRate => "heart-rate",
            Encoder::Uint8 => "uint8",
            Encoder::Uint16 => "uint16",
            Encoder::Uint32 => "uint32",
            Encoder::Text => "text",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Encoder::BloodPressure => "Blood Pressure Measurement (0x2A35) with pulse rate",
            Encoder::PulseOximeter => "Pulse Oximeter Measurement, SpO2 and pulse rate",
            Encoder::WeightScale => "Weight Measurement (0x2A9D)",
            Encoder::BatteryLevel => "Battery Level (0x2A19), 0-100%",
            Encoder::HeartRate => "Heart Rate Measurement (0x2A37)",
            Encoder::Uint8 => "Unsigned 8-bit integer (0-255)",
            Encoder::Uint16 => "Unsigned 16-bit integer (0-65535)",
            Encoder::Uint32 => "Unsigned 32-bit integer (0-4294967295)",
            Encoder::Text => "Plain UTF-8 text",
        }
    }

    pub fn example(self) -> &'static str {
        match self {
            Encoder::BloodPressure => "120 80 72 (systolic, diastolic, pulse)",
            Encoder::PulseOximeter => "98 72 [2.5] (SpO2%, pulse rate, perfusion index)",
            Encoder::WeightScale => "75.5 or 165 lb",
            Encoder::BatteryLevel => "85",
            Encoder::HeartRate => "72",
            Encoder::Uint8 => "42",
            Encoder::Uint16 => "1234",
            Encoder::Uint32 => "12345",
            Encoder::Text => "any text",
        }
    }

    pub fn info(self) -> EncoderInfo {
        EncoderInfo {
            name: self.name(),
            description: self.description(),
            example: self.example(),
        }
    }

    pub fn encode(self, args: &EncoderArgs) -> Result<Vec<u8>> {
        let res = match (self, args) {
            (Encoder::BloodPressure, EncoderArgs::BloodPressure(x)) => {
                let mean = (x.systolic as f64 + x.diastolic as f64) / 3.0;
                let mut res = Vec::with_capacity(9);
                // pulse rate present
                res.push(0x04);
                res.extend_from_slice(&sfloat(x.systolic as f64).to_le_bytes());
                res.extend_from_slice(&sfloat(x.diastolic as f64).to_le_bytes());
                res.extend_from_slice(&sfloat(mean).to_le_bytes());
                res.extend_from_slice(&sfloat(x.pulse_rate as f64).to_le_bytes());
                res
            }
            (Encoder::PulseOximeter, EncoderArgs::PulseOximeter(x)) => {
                let flags = x.perfusion_index.is_some() as u8;
                let spo2: u8 = field("spo2", x.spo2)?;
                let pulse: u16 = field("pulse rate", x.pulse_rate.saturating_mul(10))?;
                let mut res = vec![flags, spo2];
                res.extend_from_slice(&pulse.to_le_bytes());
                if let Some(pi) = x.perfusion_index {
                    res.push(field::<u8>("perfusion index", (pi * 10.0).round() as i64)?);
                }
                res
            }
            (Encoder::WeightScale, EncoderArgs::WeightScale(x)) => {
                // resolution is 0.01 lb or 0.005 kg
                let (flags, scale) = match x.unit {
                    WeightUnit::Kg => (0x00, 200.0),
                    WeightUnit::Lb => (0x01, 100.0),
                };
                let weight: u16 = field("weight", (x.weight * scale).round() as i64)?;
                let mut res = vec![flags];
                res.extend_from_slice(&weight.to_le_bytes());
                res
            }
            (Encoder::BatteryLevel, EncoderArgs::BatteryLevel(x)) => {
                vec![(*x).clamp(0, 100) as u8]
            }
            (Encoder::HeartRate, EncoderArgs::HeartRate(x)) => {
                if (0..=0xff).contains(x) {
                    vec![0x00, *x as u8]
                } else {
                    let bpm = (*x).clamp(0, 0xffff) as u16;
                    let mut res = vec![0x01];
                    res.extend_from_slice(&bpm.to_le_bytes());
                    res
                }
            }
            (Encoder::Uint8, EncoderArgs::Uint8(x)) => vec![*x as u8],
            (Encoder::Uint16, EncoderArgs::Uint16(x)) => (*x as u16).to_le_bytes().to_vec(),
            (Encoder::Uint32, EncoderArgs::Uint32(x)) => (*x as u32).to_le_bytes().to_vec(),
            (Encoder::Text, EncoderArgs::Text(x)) => x.as_bytes().to_vec(),
            (encoder, args) => {
                return Err(Error::InvalidArgument(format!(
                    "`{}` cannot encode {:?}",
                    encoder.name(),
                    args
                )))
            }
        };
        Ok(res)
    }
}

/// Encode with the encoder registered under `name`.
pub fn encode(name: &str, args: &EncoderArgs) -> Result<Vec<u8>> {
    Encoder::from_name(name)
        .ok_or_else(|| Error::UnknownEncoder(name.to_string()))?
        .encode(args)
}

/// Parse operator tokens for `name` and encode them in one step.
pub fn encode_tokens<S: AsRef<str>>(name: &str, tokens: &[S]) -> Result<Vec<u8>> {
    let args = parse_args(name, tokens)?;
    encode(name, &args)
}

/// Every registered encoder, in a stable order. Cloning the iterator restarts it.
pub fn list_encoders() -> impl Iterator<Item = EncoderInfo> + Clone {
    Encoder::ALL.into_iter().map(Encoder::info)
}

pub use args::parse_args;
