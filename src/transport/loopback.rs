use async_trait::async_trait;
use enumflags2::BitFlags;
use log::{debug, info};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

use super::{AdapterState, GattCharacteristic, GattTree, Transport, TransportEvent};
use crate::{
    config::Property,
    error::{Error, Result},
};

#[derive(Default)]
struct State {
    advertising: Option<String>,
    tree: Option<GattTree>,
    clients: Vec<String>,
}

/// In-process transport without a radio. It is always powered on and plays the client side
/// itself through the `client_*` methods.
pub struct Loopback {
    events: UnboundedSender<TransportEvent>,
    state: Mutex<State>,
}

impl Loopback {
    pub fn new() -> (Self, UnboundedReceiver<TransportEvent>) {
        let (send, recv) = mpsc::unbounded_channel();
        send.send(TransportEvent::StateChange(AdapterState::PoweredOn))
            .ok();
        let this = Loopback {
            events: send,
            state: Mutex::new(State::default()),
        };
        (this, recv)
    }

    pub fn advertised_name(&self) -> Option<String> {
        self.state.lock().advertising.clone()
    }

    pub fn tree(&self) -> Option<GattTree> {
        self.state.lock().tree.clone()
    }

    /// Report an adapter state change, as a real stack would on power toggles.
    pub fn set_state(&self, state: AdapterState) {
        self.events.send(TransportEvent::StateChange(state)).ok();
    }

    pub fn connect(&self, address: &str) {
        self.state.lock().clients.push(address.to_string());
        self.events
            .send(TransportEvent::Accept(address.to_string()))
            .ok();
    }

    fn lookup(
        &self,
        uuid: Uuid,
        allowed: impl Into<BitFlags<Property>>,
    ) -> Result<(GattCharacteristic, GattTree)> {
        let state = self.state.lock();
        let tree = state
            .tree
            .as_ref()
            .ok_or_else(|| Error::Transport("no services registered".to_string()))?;
        let characteristic = tree
            .find(uuid)
            .ok_or_else(|| Error::UnknownCharacteristic(uuid.to_string()))?;
        if !characteristic.properties.intersects(allowed.into()) {
            return Err(Error::NotSupported(characteristic.name.clone()));
        }
        Ok((characteristic.clone(), tree.clone()))
    }

    pub fn client_read(&self, uuid: Uuid) -> Result<Vec<u8>> {
        let (c, tree) = self.lookup(uuid, Property::Read)?;
        tree.dispatcher.on_read(&c.name)
    }

    pub fn client_write(&self, uuid: Uuid, value: &[u8]) -> Result<()> {
        let (c, tree) = self.lookup(
            uuid,
            Property::Write | Property::WriteWithoutResponse | Property::AuthenticatedSignedWrites,
        )?;
        tree.dispatcher.on_write(&c.name, value)
    }

    pub fn client_subscribe(&self, uuid: Uuid) -> Result<UnboundedReceiver<Vec<u8>>> {
        let (c, tree) = self.lookup(uuid, Property::Notify | Property::Indicate)?;
        let (send, recv) = mpsc::unbounded_channel();
        tree.dispatcher.on_subscribe(&c.name, move |b: &[u8]| {
            send.send(b.to_vec()).ok();
        })?;
        Ok(recv)
    }

    pub fn client_unsubscribe(&self, uuid: Uuid) -> Result<()> {
        let (c, tree) = self.lookup(uuid, Property::Notify | Property::Indicate)?;
        tree.dispatcher.on_unsubscribe(&c.name);
        Ok(())
    }
}

#[async_trait]
impl Transport for Loopback {
    async fn start_advertising(&self, name: &str, service_uuids: &[Uuid]) -> Result<()> {
        debug!("loopback advertising {} with {:?}", name, service_uuids);
        self.state.lock().advertising = Some(name.to_string());
        self.events.send(TransportEvent::AdvertisingStart(None)).ok();
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.advertising = None;
        state.tree = None;
        Ok(())
    }

    async fn set_services(&self, tree: GattTree) -> Result<()> {
        self.state.lock().tree = Some(tree);
        Ok(())
    }

    async fn disconnect(&self) {
        let clients = std::mem::take(&mut self.state.lock().clients);
        for c in clients {
            info!("loopback dropping client {}", c);
            self.events.send(TransportEvent::Disconnect(c)).ok();
        }
    }
}
