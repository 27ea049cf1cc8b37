use std::{collections::HashSet, path::Path, str::FromStr};

use enumflags2::{bitflags, BitFlags};
use log::warn;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    encoder::Encoder,
    error::{Error, Result},
};

/// The lower 96 bits of the Bluetooth base UUID `00000000-0000-1000-8000-00805F9B34FB`.
const BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5F9B_34FB;

#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Property {
    Read = 0x01,
    Write = 0x02,
    WriteWithoutResponse = 0x04,
    Notify = 0x08,
    Indicate = 0x10,
    AuthenticatedSignedWrites = 0x20,
    ExtendedProperties = 0x40,
}

impl Property {
    pub fn name(self) -> &'static str {
        match self {
            Property::Read => "read",
            Property::Write => "write",
            Property::WriteWithoutResponse => "writeWithoutResponse",
            Property::Notify => "notify",
            Property::Indicate => "indicate",
            Property::AuthenticatedSignedWrites => "authenticatedSignedWrites",
            Property::ExtendedProperties => "extendedProperties",
        }
    }
}

impl FromStr for Property {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        BitFlags::<Property>::all()
            .iter()
            .find(|p| p.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::Config(format!("unknown characteristic property `{}`", s)))
    }
}

pub fn format_properties(props: BitFlags<Property>) -> String {
    props.iter().map(Property::name).collect::<Vec<_>>().join(", ")
}

/// Parses 16-bit and 32-bit short forms against the Bluetooth base UUID, or a full 128-bit UUID.
pub fn parse_uuid(s: &str) -> Result<Uuid> {
    let s = s.trim();
    let short = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    if short.len() == 4 || short.len() == 8 {
        let v = u32::from_str_radix(short, 16)
            .map_err(|_| Error::Config(format!("invalid uuid `{}`", s)))?;
        return Ok(Uuid::from_u128(((v as u128) << 96) | BASE_UUID));
    }
    Uuid::parse_str(s).map_err(|e| Error::Config(format!("invalid uuid `{}`: {}", s, e)))
}

pub mod ser_properties {
    use enumflags2::BitFlags;
    use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

    use super::Property;

    pub fn serialize<S>(flags: &BitFlags<Property>, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let list: Vec<_> = flags.iter().map(Property::name).collect();
        list.serialize(s)
    }

    pub fn deserialize<'de, D>(d: D) -> Result<BitFlags<Property>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = Vec::<String>::deserialize(d)?;
        let mut res = BitFlags::empty();
        for v in v {
            res |= v.parse::<Property>().map_err(D::Error::custom)?;
        }
        Ok(res)
    }
}

pub mod ser_uuid {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};
    use uuid::Uuid;

    pub fn serialize<S>(uuid: &Uuid, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.collect_str(uuid)
    }

    pub fn deserialize<'de, D>(d: D) -> Result<Uuid, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(d)?;
        super::parse_uuid(&s).map_err(D::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderRef {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacteristicConfig {
    #[serde(with = "ser_uuid")]
    pub uuid: Uuid,
    pub name: String,
    #[serde(with = "ser_properties")]
    pub properties: BitFlags<Property>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoder: Option<EncoderRef>,
}

impl CharacteristicConfig {
    pub fn encoder_type(&self) -> Option<&str> {
        self.encoder.as_ref().map(|x| x.kind.as_str())
    }

    pub fn initial_value(&self) -> Vec<u8> {
        self.initial
            .as_deref()
            .map(|x| x.as_bytes().to_vec())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(with = "ser_uuid")]
    pub uuid: Uuid,
    #[serde(default)]
    pub characteristics: Vec<CharacteristicConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

impl DeviceConfig {
    pub fn from_json(b: &[u8]) -> Result<Self> {
        let config: DeviceConfig =
            serde_json::from_slice(b).map_err(|e| Error::Config(e.to_string()))?;
        if config.name.is_empty() {
            return Err(Error::Config("device name must not be empty".to_string()));
        }
        for w in config.validate() {
            warn!("{}: {}", config.name, w);
        }
        Ok(config)
    }

    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = tokio::fs::read(path)
            .await
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_json(&file)
    }

    /// Name shown to the operator, falls back to the advertised name.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    pub fn service_uuids(&self) -> Vec<Uuid> {
        self.services.iter().map(|x| x.uuid).collect()
    }

    pub fn characteristics(&self) -> impl Iterator<Item = &CharacteristicConfig> {
        self.services.iter().flat_map(|x| x.characteristics.iter())
    }

    /// Problems which do not prevent activation. Duplicate names resolve last-write-wins in
    /// the registry.
    pub fn validate(&self) -> Vec<String> {
        let mut res = Vec::new();
        let mut seen = HashSet::new();
        for c in self.characteristics() {
            if !seen.insert(c.name.as_str()) {
                res.push(format!(
                    "duplicate characteristic name `{}`, only the last one is reachable",
                    c.name
                ));
            }
            if let Some(kind) = c.encoder_type() {
                if Encoder::from_name(kind).is_none() {
                    res.push(format!(
                        "characteristic `{}` references unknown encoder `{}`",
                        c.name, kind
                    ));
                }
            }
        }
        res
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const DEVICE: &str = r#"{
        "name": "BP-Sim",
        "displayName": "Blood pressure cuff",
        "services": [{
            "uuid": "1810",
            "characteristics": [{
                "uuid": "0x2A35",
                "name": "bp",
                "properties": ["Read", "notify", "writeWithoutResponse"],
                "encoder": { "type": "blood-pressure" }
            }, {
                "uuid": "6e400002-b5a3-f393-e0a9-e50e24dcca9e",
                "name": "label",
                "properties": ["read", "write"],
                "initial": "hello"
            }]
        }]
    }"#;

    #[test]
    fn parse_device() {
        let config = DeviceConfig::from_json(DEVICE.as_bytes()).unwrap();
        assert_eq!(config.label(), "Blood pressure cuff");
        assert_eq!(
            config.services[0].uuid,
            Uuid::parse_str("00001810-0000-1000-8000-00805f9b34fb").unwrap()
        );

        let bp = &config.services[0].characteristics[0];
        assert_eq!(
            bp.uuid,
            Uuid::parse_str("00002a35-0000-1000-8000-00805f9b34fb").unwrap()
        );
        assert_eq!(
            bp.properties,
            Property::Read | Property::Notify | Property::WriteWithoutResponse
        );
        assert_eq!(bp.encoder_type(), Some("blood-pressure"));
        assert!(bp.initial_value().is_empty());

        let label = &config.services[0].characteristics[1];
        assert_eq!(label.initial_value(), b"hello".to_vec());
        assert!(config.validate().is_empty());
    }

    #[test]
    fn unknown_property() {
        let json = r#"{"name":"x","services":[{"uuid":"180f","characteristics":[
            {"uuid":"2a19","name":"battery","properties":["broadcast"]}]}]}"#;
        assert!(matches!(
            DeviceConfig::from_json(json.as_bytes()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn missing_name() {
        assert!(DeviceConfig::from_json(br#"{"name":"","services":[]}"#).is_err());
        assert!(DeviceConfig::from_json(br#"{"services":[]}"#).is_err());
    }

    #[test]
    fn validate_reports_duplicates() {
        let json = r#"{"name":"x","services":[{"uuid":"180f","characteristics":[
            {"uuid":"2a19","name":"level","properties":["read"]},
            {"uuid":"2a1a","name":"level","properties":["read"],"encoder":{"type":"nope"}}]}]}"#;
        let config = DeviceConfig::from_json(json.as_bytes()).unwrap();
        assert_eq!(config.validate().len(), 2);
    }

    #[test]
    fn property_roundtrip_names() {
        let props = Property::Read | Property::AuthenticatedSignedWrites;
        let json = serde_json::to_string(&CharacteristicConfig {
            uuid: parse_uuid("2a00").unwrap(),
            name: "n".to_string(),
            properties: props,
            initial: None,
            encoder: None,
        })
        .unwrap();
        assert!(json.contains(r#"["read","authenticatedSignedWrites"]"#));
    }
}
