use crate::error::{Error, Result};

use super::{BloodPressure, Encoder, EncoderArgs, PulseOximeter, WeightScale, WeightUnit};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Text(String),
}

impl Token {
    fn parse(s: &str) -> Self {
        match s.parse::<f64>() {
            Ok(x) if !x.is_nan() => Token::Number(x),
            _ => Token::Text(s.to_string()),
        }
    }
}

fn int(s: &str) -> Result<i64> {
    if let Ok(x) = s.parse::<i64>() {
        return Ok(x);
    }
    match s.parse::<f64>() {
        Ok(x) if x.is_finite() => Ok(x.trunc() as i64),
        _ => Err(Error::InvalidArgument(format!("`{}` is not an integer", s))),
    }
}

fn float(s: &str) -> Result<f64> {
    match s.parse::<f64>() {
        Ok(x) if x.is_finite() => Ok(x),
        _ => Err(Error::InvalidArgument(format!("`{}` is not a number", s))),
    }
}

fn require<S>(encoder: Encoder, tokens: &[S], min: usize, usage: &str) -> Result<()> {
    if tokens.len() < min {
        return Err(Error::InsufficientArguments(format!(
            "{} requires {}",
            encoder.name(),
            usage
        )));
    }
    Ok(())
}

impl Encoder {
    /// Turn operator tokens into the typed arguments this encoder expects.
    pub fn parse_args<S: AsRef<str>>(self, tokens: &[S]) -> Result<EncoderArgs> {
        let t = |idx: usize| tokens.get(idx).map(|x| x.as_ref());
        let args = match self {
            Encoder::BloodPressure => {
                require(self, tokens, 3, "3 values: systolic diastolic pulse")?;
                EncoderArgs::BloodPressure(BloodPressure {
                    systolic: int(tokens[0].as_ref())?,
                    diastolic: int(tokens[1].as_ref())?,
                    pulse_rate: int(tokens[2].as_ref())?,
                })
            }
            Encoder::PulseOximeter => {
                require(self, tokens, 2, "at least 2 values: spo2 pulse [perfusion]")?;
                EncoderArgs::PulseOximeter(PulseOximeter {
                    spo2: int(tokens[0].as_ref())?,
                    pulse_rate: int(tokens[1].as_ref())?,
                    perfusion_index: t(2).map(float).transpose()?,
                })
            }
            Encoder::WeightScale => {
                require(self, tokens, 1, "at least 1 value: weight [kg|lb]")?;
                let unit = match t(1) {
                    Some("lb") => WeightUnit::Lb,
                    _ => WeightUnit::Kg,
                };
                EncoderArgs::WeightScale(WeightScale {
                    weight: float(tokens[0].as_ref())?,
                    unit,
                })
            }
            Encoder::BatteryLevel
            | Encoder::HeartRate
            | Encoder::Uint8
            | Encoder::Uint16
            | Encoder::Uint32 => {
                require(self, tokens, 1, "1 value")?;
                let v = int(tokens[0].as_ref())?;
                match self {
                    Encoder::BatteryLevel => EncoderArgs::BatteryLevel(v),
                    Encoder::HeartRate => EncoderArgs::HeartRate(v),
                    Encoder::Uint8 => EncoderArgs::Uint8(v),
                    Encoder::Uint16 => EncoderArgs::Uint16(v),
                    _ => EncoderArgs::Uint32(v),
                }
            }
            Encoder::Text => {
                require(self, tokens, 1, "some text")?;
                let text: Vec<&str> = tokens.iter().map(|x| x.as_ref()).collect();
                EncoderArgs::Text(text.join(" "))
            }
        };
        Ok(args)
    }
}

/// Parse tokens for the encoder registered as `name`.
///
/// Unregistered names never fail here: each token becomes a number when it parses as one and
/// stays text otherwise.
pub fn parse_args<S: AsRef<str>>(name: &str, tokens: &[S]) -> Result<EncoderArgs> {
    match Encoder::from_name(name) {
        Some(x) => x.parse_args(tokens),
        None => Ok(EncoderArgs::Raw(
            tokens.iter().map(|x| Token::parse(x.as_ref())).collect(),
        )),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn blood_pressure_arity() {
        assert!(matches!(
            parse_args("blood-pressure", &["120", "80"]),
            Err(Error::InsufficientArguments(_))
        ));
        assert_eq!(
            parse_args("blood-pressure", &["120", "80", "72"]).unwrap(),
            EncoderArgs::BloodPressure(BloodPressure {
                systolic: 120,
                diastolic: 80,
                pulse_rate: 72
            })
        );
        assert!(matches!(
            parse_args("blood-pressure", &["120", "high", "72"]),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn pulse_oximeter_optional_perfusion() {
        let args = parse_args("pulse-oximeter", &["98", "72"]).unwrap();
        assert_eq!(
            args,
            EncoderArgs::PulseOximeter(PulseOximeter {
                spo2: 98,
                pulse_rate: 72,
                perfusion_index: None
            })
        );
        let args = parse_args("pulse-oximeter", &["98", "72", "2.5"]).unwrap();
        assert!(matches!(
            args,
            EncoderArgs::PulseOximeter(PulseOximeter {
                perfusion_index: Some(x),
                ..
            }) if x == 2.5
        ));
        assert!(parse_args("pulse-oximeter", &["98"]).is_err());
    }

    #[test]
    fn weight_unit_defaults_to_kg() {
        let unit = |tokens: &[&str]| match parse_args("weight-scale", tokens).unwrap() {
            EncoderArgs::WeightScale(x) => x.unit,
            x => panic!("unexpected {:?}", x),
        };
        assert_eq!(unit(&["75.5"]), WeightUnit::Kg);
        assert_eq!(unit(&["165", "lb"]), WeightUnit::Lb);
        assert_eq!(unit(&["75", "stone"]), WeightUnit::Kg);
        assert!(matches!(
            parse_args::<&str>("weight-scale", &[]),
            Err(Error::InsufficientArguments(_))
        ));
    }

    #[test]
    fn scalar_and_text() {
        assert_eq!(
            parse_args("battery-level", &["-5"]).unwrap(),
            EncoderArgs::BatteryLevel(-5)
        );
        assert_eq!(parse_args("uint16", &["12.9"]).unwrap(), EncoderArgs::Uint16(12));
        assert_eq!(
            parse_args("text", &["hello", "world"]).unwrap(),
            EncoderArgs::Text("hello world".to_string())
        );
        assert!(parse_args::<&str>("uint8", &[]).is_err());
    }

    #[test]
    fn unknown_encoder_is_permissive() {
        assert_eq!(
            parse_args("glucose", &["5.4", "mmol"]).unwrap(),
            EncoderArgs::Raw(vec![Token::Number(5.4), Token::Text("mmol".to_string())])
        );
    }

    #[test]
    fn tokens_to_bytes() {
        assert_eq!(
            super::super::encode_tokens("weight-scale", &["165", "lb"]).unwrap(),
            vec![0x01, 0x74, 0x40]
        );
        assert!(matches!(
            super::super::encode_tokens("glucose", &["5"]),
            Err(Error::UnknownEncoder(_))
        ));
    }
}
