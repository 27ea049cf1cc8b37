use std::{collections::HashMap, fmt, sync::Arc};

use enumflags2::BitFlags;
use log::{debug, warn};
use parking_lot::Mutex;

use crate::{
    config::{CharacteristicConfig, Property},
    error::{Error, Result},
};

/// Sink for notifications of one subscribed client.
pub type UpdateValueCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

pub struct CharacteristicHandle {
    pub config: Arc<CharacteristicConfig>,
    pub value: Vec<u8>,
    pub update_value_callback: Option<UpdateValueCallback>,
}

impl CharacteristicHandle {
    pub fn new(config: Arc<CharacteristicConfig>) -> Self {
        CharacteristicHandle {
            value: config.initial_value(),
            config,
            update_value_callback: None,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.update_value_callback.is_some()
    }
}

impl fmt::Debug for CharacteristicHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CharacteristicHandle")
            .field("name", &self.config.name)
            .field("value", &self.value)
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}

/// Point in time copy of a handle, for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub name: String,
    pub properties: BitFlags<Property>,
    pub value: Vec<u8>,
    pub encoder: Option<String>,
    pub subscribed: bool,
}

#[derive(Default)]
struct Inner {
    handles: HashMap<String, CharacteristicHandle>,
    order: Vec<String>,
}

/// Table of characteristic handles keyed by characteristic name.
///
/// Clones share the same table.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<Mutex<Inner>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh handle for `config`. An existing handle with the same name is replaced.
    pub fn register(&self, config: Arc<CharacteristicConfig>) -> Handle {
        let name = config.name.clone();
        let mut inner = self.inner.lock();
        let handle = CharacteristicHandle::new(config);
        if inner.handles.insert(name.clone(), handle).is_some() {
            warn!("characteristic `{}` registered twice, last one wins", name);
        } else {
            inner.order.push(name.clone());
        }
        Handle {
            registry: self.clone(),
            name,
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        if !inner.handles.is_empty() {
            debug!("clearing {} characteristics", inner.handles.len());
        }
        inner.handles.clear();
        inner.order.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.lock().handles.contains_key(name)
    }

    /// Names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.inner.lock().order.clone()
    }

    pub fn config(&self, name: &str) -> Option<Arc<CharacteristicConfig>> {
        self.inner
            .lock()
            .handles
            .get(name)
            .map(|x| x.config.clone())
    }

    pub fn snapshot(&self) -> Vec<Snapshot> {
        let inner = self.inner.lock();
        inner
            .order
            .iter()
            .filter_map(|name| inner.handles.get(name))
            .map(|x| Snapshot {
                name: x.config.name.clone(),
                properties: x.config.properties,
                value: x.value.clone(),
                encoder: x.config.encoder_type().map(str::to_string),
                subscribed: x.is_subscribed(),
            })
            .collect()
    }

    /// Run `f` on the handle named `name` while holding the table lock.
    ///
    /// `f` must not call back into the registry.
    pub fn with<R, F>(&self, name: &str, f: F) -> Result<R>
    where
        F: FnOnce(&mut CharacteristicHandle) -> R,
    {
        let mut inner = self.inner.lock();
        inner
            .handles
            .get_mut(name)
            .map(f)
            .ok_or_else(|| Error::UnknownCharacteristic(name.to_string()))
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_list().entries(inner.handles.values()).finish()
    }
}

/// Reference to a registered characteristic by name.
#[derive(Clone)]
pub struct Handle {
    registry: Registry,
    name: String,
}

impl Handle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> Result<Vec<u8>> {
        self.registry.with(&self.name, |x| x.value.clone())
    }

    pub fn is_subscribed(&self) -> bool {
        self.registry
            .with(&self.name, |x| x.is_subscribed())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::parse_uuid;

    fn characteristic(name: &str, initial: Option<&str>) -> Arc<CharacteristicConfig> {
        Arc::new(CharacteristicConfig {
            uuid: parse_uuid("2a19").unwrap(),
            name: name.to_string(),
            properties: Property::Read | Property::Notify,
            initial: initial.map(str::to_string),
            encoder: None,
        })
    }

    #[test]
    fn register_initial_value() {
        let registry = Registry::new();
        let a = registry.register(characteristic("a", Some("hi")));
        let b = registry.register(characteristic("b", None));
        assert_eq!(a.value().unwrap(), b"hi".to_vec());
        assert!(b.value().unwrap().is_empty());
        assert!(!a.is_subscribed());
        assert_eq!(registry.names(), vec!["a", "b"]);
    }

    #[test]
    fn last_registration_wins() {
        let registry = Registry::new();
        registry.register(characteristic("level", Some("first")));
        let second = registry.register(characteristic("level", Some("second")));
        assert_eq!(registry.len(), 1);
        assert_eq!(second.value().unwrap(), b"second".to_vec());
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[test]
    fn clear_is_idempotent() {
        let registry = Registry::new();
        let a = registry.register(characteristic("a", None));
        registry.clear();
        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.names().is_empty());
        assert!(matches!(a.value(), Err(Error::UnknownCharacteristic(_))));
    }

    #[test]
    fn clones_share_state() {
        let registry = Registry::new();
        let other = registry.clone();
        registry.register(characteristic("a", None));
        assert!(other.contains("a"));
    }
}
