//! Boundary to the radio stack.
//!
//! A transport advertises, installs a GATT tree and reports adapter events. Client requests
//! arriving over the air are routed by the transport into the [`Dispatcher`] carried by the tree.

use async_trait::async_trait;
use enumflags2::BitFlags;
use uuid::Uuid;

use crate::{config::Property, dispatch::Dispatcher, error::Result};

mod loopback;
pub use loopback::Loopback;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

impl AdapterState {
    pub fn is_powered_on(self) -> bool {
        self == AdapterState::PoweredOn
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    StateChange(AdapterState),
    /// Advertising confirmation, carrying the failure reason if it did not start.
    AdvertisingStart(Option<String>),
    Accept(String),
    Disconnect(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    /// Key of the handle in the registry.
    pub name: String,
    pub properties: BitFlags<Property>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<GattCharacteristic>,
}

#[derive(Debug, Clone)]
pub struct GattTree {
    pub services: Vec<GattService>,
    pub dispatcher: Dispatcher,
}

impl GattTree {
    pub fn service_uuids(&self) -> Vec<Uuid> {
        self.services.iter().map(|x| x.uuid).collect()
    }

    pub fn find(&self, uuid: Uuid) -> Option<&GattCharacteristic> {
        self.services
            .iter()
            .flat_map(|x| x.characteristics.iter())
            .find(|x| x.uuid == uuid)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Resolves once the stack confirms advertising started.
    async fn start_advertising(&self, name: &str, service_uuids: &[Uuid]) -> Result<()>;

    async fn stop_advertising(&self) -> Result<()>;

    /// Replace the served GATT tree. Resolves once the stack accepted it.
    async fn set_services(&self, tree: GattTree) -> Result<()>;

    /// Drop every connected client.
    async fn disconnect(&self);
}
