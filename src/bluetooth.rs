use std::time::Duration;

use async_trait::async_trait;
use bluer::{
    adv::{Advertisement, AdvertisementHandle},
    gatt::local::{
        Application, ApplicationHandle, Characteristic, CharacteristicNotify,
        CharacteristicNotifyMethod, CharacteristicRead, CharacteristicWrite,
        CharacteristicWriteMethod, ReqError, Service,
    },
    Adapter, AdapterEvent, AdapterProperty, Address, DeviceEvent, DeviceProperty, Session,
};
use futures::{pin_mut, FutureExt, StreamExt};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

use crate::{
    config::Property,
    dispatch::Dispatcher,
    error::{Error, Result},
    transport::{AdapterState, GattCharacteristic, GattTree, Transport, TransportEvent},
};

fn transport_error(e: bluer::Error) -> Error {
    Error::Transport(e.to_string())
}

/// Transport backed by BlueZ over D-Bus.
pub struct BluetoothPeripheral {
    _session: Session,
    adapter: Adapter,
    events: UnboundedSender<TransportEvent>,
    advert_handle: Mutex<Option<AdvertisementHandle>>,
    app_handle: Mutex<Option<ApplicationHandle>>,
}

impl BluetoothPeripheral {
    pub async fn new() -> Result<(Self, UnboundedReceiver<TransportEvent>)> {
        let session = Session::new().await.map_err(transport_error)?;
        let adapter = session.default_adapter().await.map_err(transport_error)?;
        let address = adapter.address().await.map_err(transport_error)?;

        info!(
            "running on bluetooth adapter `{}` with address `{}`",
            adapter.name(),
            address,
        );

        let (send, recv) = mpsc::unbounded_channel();
        let powered = adapter.is_powered().await.map_err(transport_error)?;
        send.send(TransportEvent::StateChange(power_state(powered)))
            .ok();
        if !powered {
            adapter.set_powered(true).await.map_err(transport_error)?;
        }

        let adapter_events = adapter.events().await.map_err(transport_error)?;
        let events = send.clone();
        let watched = adapter.clone();
        tokio::spawn(async move {
            pin_mut!(adapter_events);
            while let Some(evt) = adapter_events.next().await {
                match evt {
                    AdapterEvent::PropertyChanged(AdapterProperty::Powered(x)) => {
                        if events
                            .send(TransportEvent::StateChange(power_state(x)))
                            .is_err()
                        {
                            break;
                        }
                    }
                    AdapterEvent::DeviceAdded(addr) => {
                        watch_device(&watched, addr, events.clone()).await;
                    }
                    AdapterEvent::DeviceRemoved(addr) => debug!("device removed {}", addr),
                    _ => {}
                }
            }
        });

        Ok((
            BluetoothPeripheral {
                _session: session,
                adapter,
                events: send,
                advert_handle: Mutex::new(None),
                app_handle: Mutex::new(None),
            },
            recv,
        ))
    }
}

fn power_state(powered: bool) -> AdapterState {
    if powered {
        AdapterState::PoweredOn
    } else {
        AdapterState::PoweredOff
    }
}

/// Report connects and disconnects of one remote device.
async fn watch_device(adapter: &Adapter, addr: Address, events: UnboundedSender<TransportEvent>) {
    let device = match adapter.device(addr) {
        Ok(x) => x,
        Err(e) => {
            debug!("cannot watch device {}: {}", addr, e);
            return;
        }
    };
    let device_events = match device.events().await {
        Ok(x) => x,
        Err(e) => {
            debug!("cannot watch device {}: {}", addr, e);
            return;
        }
    };
    tokio::spawn(async move {
        pin_mut!(device_events);
        while let Some(DeviceEvent::PropertyChanged(prop)) = device_events.next().await {
            let event = match prop {
                DeviceProperty::Connected(true) => TransportEvent::Accept(addr.to_string()),
                DeviceProperty::Connected(false) => TransportEvent::Disconnect(addr.to_string()),
                _ => continue,
            };
            if events.send(event).is_err() {
                break;
            }
        }
    });
}

fn read_method(c: &GattCharacteristic, dispatcher: &Dispatcher) -> CharacteristicRead {
    let dispatcher = dispatcher.clone();
    let name = c.name.clone();
    CharacteristicRead {
        read: true,
        fun: Box::new(move |req| {
            let res = match dispatcher.on_read(&name) {
                Ok(value) => value
                    .get(req.offset as usize..)
                    .map(|x| x.to_vec())
                    .ok_or(ReqError::InvalidOffset),
                Err(e) => {
                    warn!("read from {} failed: {}", req.device_address, e);
                    Err(ReqError::Failed)
                }
            };
            async move { res }.boxed()
        }),
        ..Default::default()
    }
}

fn write_method(c: &GattCharacteristic, dispatcher: &Dispatcher) -> CharacteristicWrite {
    let dispatcher = dispatcher.clone();
    let name = c.name.clone();
    CharacteristicWrite {
        write: c.properties.contains(Property::Write),
        write_without_response: c.properties.contains(Property::WriteWithoutResponse),
        authenticated_signed_writes: c.properties.contains(Property::AuthenticatedSignedWrites),
        method: CharacteristicWriteMethod::Fun(Box::new(move |new_value, req| {
            let offset = req.offset as usize;
            let value = if offset == 0 {
                Ok(new_value)
            } else {
                dispatcher.on_read(&name).map(|mut old| {
                    old.truncate(offset);
                    old.extend_from_slice(&new_value);
                    old
                })
            };
            let res = value
                .and_then(|x| dispatcher.on_write(&name, &x))
                .map_err(|e| {
                    warn!("write from {} failed: {}", req.device_address, e);
                    ReqError::Failed
                });
            async move { res }.boxed()
        })),
        ..Default::default()
    }
}

fn notify_method(c: &GattCharacteristic, dispatcher: &Dispatcher) -> CharacteristicNotify {
    let dispatcher = dispatcher.clone();
    let name = c.name.clone();
    CharacteristicNotify {
        notify: c.properties.contains(Property::Notify),
        indicate: c.properties.contains(Property::Indicate),
        method: CharacteristicNotifyMethod::Fun(Box::new(move |mut notifier| {
            let dispatcher = dispatcher.clone();
            let name = name.clone();
            async move {
                let (send, mut recv) = mpsc::unbounded_channel::<Vec<u8>>();
                let subscribed = dispatcher.on_subscribe(&name, move |b: &[u8]| {
                    send.send(b.to_vec()).ok();
                });
                let subscription = match subscribed {
                    Ok(x) => x,
                    Err(e) => {
                        warn!("subscription to {} rejected: {}", name, e);
                        return;
                    }
                };
                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            value = recv.recv() => match value {
                                Some(value) => {
                                    if let Err(e) = notifier.notify(value).await {
                                        debug!("notification on {} failed: {}", name, e);
                                        break;
                                    }
                                }
                                None => break,
                            },
                            _ = tokio::time::sleep(Duration::from_millis(500)) => {
                                if notifier.is_stopped() {
                                    break;
                                }
                            }
                        }
                    }
                    // a later subscriber may have replaced this one
                    dispatcher.on_unsubscribe_if(&name, &subscription);
                });
            }
            .boxed()
        })),
        ..Default::default()
    }
}

fn application(tree: &GattTree) -> Application {
    let services = tree
        .services
        .iter()
        .map(|service| Service {
            uuid: service.uuid,
            primary: true,
            characteristics: service
                .characteristics
                .iter()
                .map(|c| {
                    let props = c.properties;
                    if props.contains(Property::ExtendedProperties) {
                        debug!("{}: extended properties are managed by bluez", c.name);
                    }
                    Characteristic {
                        uuid: c.uuid,
                        read: props
                            .contains(Property::Read)
                            .then(|| read_method(c, &tree.dispatcher)),
                        write: props
                            .intersects(
                                Property::Write
                                    | Property::WriteWithoutResponse
                                    | Property::AuthenticatedSignedWrites,
                            )
                            .then(|| write_method(c, &tree.dispatcher)),
                        notify: props
                            .intersects(Property::Notify | Property::Indicate)
                            .then(|| notify_method(c, &tree.dispatcher)),
                        ..Default::default()
                    }
                })
                .collect(),
            ..Default::default()
        })
        .collect();

    Application {
        services,
        ..Default::default()
    }
}

#[async_trait]
impl Transport for BluetoothPeripheral {
    async fn start_advertising(&self, name: &str, service_uuids: &[Uuid]) -> Result<()> {
        let advert = Advertisement {
            service_uuids: service_uuids.iter().copied().collect(),
            discoverable: Some(true),
            local_name: Some(name.to_string()),
            ..Default::default()
        };
        // only one advertisement at a time
        drop(self.advert_handle.lock().take());
        match self.adapter.advertise(advert).await {
            Ok(handle) => {
                *self.advert_handle.lock() = Some(handle);
                self.events.send(TransportEvent::AdvertisingStart(None)).ok();
                Ok(())
            }
            Err(e) => {
                error!("error starting advertisement: {}", e);
                self.events
                    .send(TransportEvent::AdvertisingStart(Some(e.to_string())))
                    .ok();
                Err(transport_error(e))
            }
        }
    }

    async fn stop_advertising(&self) -> Result<()> {
        // dropping the handles unregisters them from bluez
        drop(self.app_handle.lock().take());
        drop(self.advert_handle.lock().take());
        Ok(())
    }

    async fn set_services(&self, tree: GattTree) -> Result<()> {
        drop(self.app_handle.lock().take());
        let handle = self
            .adapter
            .serve_gatt_application(application(&tree))
            .await
            .map_err(transport_error)?;
        *self.app_handle.lock() = Some(handle);
        Ok(())
    }

    async fn disconnect(&self) {
        let addresses = match self.adapter.device_addresses().await {
            Ok(x) => x,
            Err(e) => {
                warn!("failed to list devices: {}", e);
                return;
            }
        };
        for addr in addresses {
            let device = match self.adapter.device(addr) {
                Ok(x) => x,
                Err(_) => continue,
            };
            if let Ok(true) = device.is_connected().await {
                info!("disconnecting {}", addr);
                if let Err(e) = device.disconnect().await {
                    warn!("error disconnecting {}: {}", addr, e);
                }
            }
        }
    }
}
