pub mod config;
pub mod dispatch;
pub mod encoder;
pub mod error;
pub mod library;
pub mod peripheral;
pub mod registry;
pub mod transport;

#[cfg(feature = "bluez")]
pub mod bluetooth;

pub use config::{CharacteristicConfig, DeviceConfig, Property, ServiceConfig};
pub use dispatch::{Dispatcher, Notified, Subscription};
pub use encoder::{Encoder, EncoderArgs};
pub use error::{Error, Result};
pub use peripheral::Peripheral;
pub use registry::Registry;

pub trait BytesExt {
    fn to_hex(&self) -> String;
}

impl BytesExt for [u8] {
    fn to_hex(&self) -> String {
        self.iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
