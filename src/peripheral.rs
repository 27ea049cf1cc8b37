//! Advertising lifecycle and device hot-swapping.
//!
//! The controller owns the active [`DeviceConfig`]. Activation waits for the adapter to power
//! on, starts advertising, builds the GATT tree into the registry and hands it to the transport;
//! each step only runs after the previous one was confirmed.

use std::{mem, sync::Arc, time::Duration};

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::sync::{mpsc::UnboundedReceiver, watch};

use crate::{
    config::DeviceConfig,
    dispatch::Dispatcher,
    error::{Error, Result},
    registry::Registry,
    transport::{
        AdapterState, GattCharacteristic, GattService, GattTree, Transport, TransportEvent,
    },
};

pub const DEFAULT_SWITCH_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Idle,
    Activating,
    Advertising,
}

#[derive(Default)]
struct State {
    current: Option<Arc<DeviceConfig>>,
    advertising: bool,
    pending: bool,
}

/// Marks an activation in flight, released on drop so a cancelled activation does not wedge
/// the controller.
struct Pending<'a>(&'a Mutex<State>);

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        self.0.lock().pending = false;
    }
}

pub struct Peripheral<T> {
    transport: T,
    dispatcher: Dispatcher,
    state: Mutex<State>,
    power: watch::Sender<AdapterState>,
    switch_timeout: Duration,
}

impl<T: Transport> Peripheral<T> {
    pub fn new(transport: T, registry: Registry) -> Self {
        let (power, _) = watch::channel(AdapterState::Unknown);
        Peripheral {
            transport,
            dispatcher: Dispatcher::new(registry),
            state: Mutex::new(State::default()),
            power,
            switch_timeout: DEFAULT_SWITCH_TIMEOUT,
        }
    }

    pub fn with_switch_timeout(mut self, timeout: Duration) -> Self {
        self.switch_timeout = timeout;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn registry(&self) -> &Registry {
        self.dispatcher.registry()
    }

    pub fn current(&self) -> Option<Arc<DeviceConfig>> {
        self.state.lock().current.clone()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        let state = self.state.lock();
        if state.pending {
            Lifecycle::Activating
        } else if state.advertising {
            Lifecycle::Advertising
        } else {
            Lifecycle::Idle
        }
    }

    pub fn adapter_state(&self) -> AdapterState {
        *self.power.borrow()
    }

    fn begin(&self) -> Result<Pending<'_>> {
        let mut state = self.state.lock();
        if state.pending {
            return Err(Error::ActivationPending);
        }
        state.pending = true;
        Ok(Pending(&self.state))
    }

    /// Make `config` the active device. Resolves once its services are installed and clients
    /// can be served.
    ///
    /// A device that is still current is stopped and its handles dropped first.
    ///
    /// Fails with [`Error::ActivationPending`] while another activation or switch is running.
    pub async fn activate(&self, config: DeviceConfig) -> Result<()> {
        let _pending = self.begin()?;
        if let Some(old) = self.current() {
            info!("replacing {} with {}", old.label(), config.label());
            self.deactivate().await;
        }
        self.run_activation(Arc::new(config)).await
    }

    /// Stop advertising if needed and drop every handle. Does nothing when idle.
    pub async fn deactivate(&self) {
        let (was_advertising, current) = {
            let mut state = self.state.lock();
            (
                mem::replace(&mut state.advertising, false),
                state.current.take(),
            )
        };
        if was_advertising {
            if let Err(e) = self.transport.stop_advertising().await {
                warn!("failed to stop advertising: {}", e);
            }
            if let Some(x) = current {
                info!("stopped {}", x.label());
            }
        }
        self.registry().clear();
    }

    /// Replace the active device with `config`, bounded by the switch timeout.
    ///
    /// On timeout the transport is told to stop and the registry is left empty.
    pub async fn switch_to(&self, config: DeviceConfig) -> Result<()> {
        let _pending = self.begin()?;
        info!("switching to {}", config.label());
        let config = Arc::new(config);

        let switch = async {
            self.deactivate().await;
            debug!("stopped current device, starting new device");
            self.run_activation(config.clone()).await
        };

        match tokio::time::timeout(self.switch_timeout, switch).await {
            Ok(res) => res,
            Err(_) => {
                error!(
                    "no advertising confirmation for {} after {:?}",
                    config.label(),
                    self.switch_timeout
                );
                self.abort().await;
                Err(Error::SwitchTimeout(self.switch_timeout))
            }
        }
    }

    /// Stop advertising, drop connected clients and clear the registry.
    pub async fn shutdown(&self) {
        info!("stopping");
        self.deactivate().await;
        self.transport.disconnect().await;
    }

    /// Feed one transport event into the controller.
    pub async fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::StateChange(state) => {
                info!("adapter state changed: {:?}", state);
                self.power.send_replace(state);
                if state.is_powered_on() {
                    self.resume().await;
                } else {
                    let was_advertising = mem::replace(&mut self.state.lock().advertising, false);
                    if was_advertising {
                        warn!("adapter is {:?}, advertising stopped", state);
                        if let Err(e) = self.transport.stop_advertising().await {
                            debug!("stop advertising after power loss: {}", e);
                        }
                    }
                }
            }
            TransportEvent::AdvertisingStart(Some(e)) => error!("error in advertising start: {}", e),
            TransportEvent::AdvertisingStart(None) => debug!("advertising start confirmed"),
            TransportEvent::Accept(address) => info!("client connected: {}", address),
            TransportEvent::Disconnect(address) => info!("client disconnected: {}", address),
        }
    }

    /// Handle transport events until the transport hangs up.
    pub async fn run(&self, mut events: UnboundedReceiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        debug!("transport event stream ended");
    }

    async fn wait_powered_on(&self) -> Result<()> {
        let mut power = self.power.subscribe();
        let mut waiting = false;
        loop {
            let powered = power.borrow_and_update().is_powered_on();
            if powered {
                return Ok(());
            }
            if !waiting {
                info!("waiting for the adapter to power on");
                waiting = true;
            }
            power
                .changed()
                .await
                .map_err(|_| Error::Transport("adapter state channel closed".to_string()))?;
        }
    }

    async fn run_activation(&self, config: Arc<DeviceConfig>) -> Result<()> {
        self.state.lock().current = Some(config.clone());
        self.wait_powered_on().await?;
        self.start(&config).await.map_err(|e| {
            self.state.lock().current = None;
            e
        })
    }

    /// Advertise `config`, then install its services. Must be called with an activation
    /// marked pending.
    async fn start(&self, config: &DeviceConfig) -> Result<()> {
        if let Err(e) = self
            .transport
            .start_advertising(&config.name, &config.service_uuids())
            .await
        {
            error!("error starting advertising: {}", e);
            return Err(e);
        }
        self.state.lock().advertising = true;
        info!("advertising as {}", config.name);

        let tree = self.build_tree(config);
        if let Err(e) = self.transport.set_services(tree).await {
            error!("error setting services: {}", e);
            self.abort().await;
            return Err(e);
        }

        info!("services registered for {}", config.label());
        for c in config.characteristics() {
            info!("   - {} ({})", c.name, c.uuid);
        }
        Ok(())
    }

    /// Registers one handle per characteristic, dropping whatever was registered before.
    fn build_tree(&self, config: &DeviceConfig) -> GattTree {
        let registry = self.registry();
        registry.clear();
        let services = config
            .services
            .iter()
            .map(|service| GattService {
                uuid: service.uuid,
                characteristics: service
                    .characteristics
                    .iter()
                    .map(|c| {
                        registry.register(Arc::new(c.clone()));
                        GattCharacteristic {
                            uuid: c.uuid,
                            name: c.name.clone(),
                            properties: c.properties,
                        }
                    })
                    .collect(),
            })
            .collect();
        GattTree {
            services,
            dispatcher: self.dispatcher.clone(),
        }
    }

    async fn abort(&self) {
        {
            let mut state = self.state.lock();
            state.advertising = false;
            state.current = None;
        }
        if let Err(e) = self.transport.stop_advertising().await {
            debug!("stop advertising during cleanup: {}", e);
        }
        self.registry().clear();
    }

    /// Re-advertise the current device after the adapter came back.
    async fn resume(&self) {
        let config = {
            let state = self.state.lock();
            if state.pending || state.advertising {
                return;
            }
            match state.current.clone() {
                Some(x) => x,
                None => return,
            }
        };
        let _pending = match self.begin() {
            Ok(x) => x,
            Err(_) => return,
        };
        info!("adapter back on, re-advertising {}", config.label());
        if let Err(e) = self.start(&config).await {
            error!("failed to restore {}: {}", config.label(), e);
            self.state.lock().current = None;
        }
    }
}
