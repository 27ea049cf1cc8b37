//! Read, write and subscription handling for registered characteristics.
//!
//! Both the radio transport (client requests) and the operator shell go through the
//! [`Dispatcher`], so a characteristic only ever changes state through the operations here.

use std::sync::{Arc, Weak};

use log::{debug, info, warn};

use crate::{
    encoder,
    error::{Error, Result},
    registry::{Registry, Snapshot, UpdateValueCallback},
};

/// Outcome of a notification. A missing subscriber is not an error, the value is still updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notified {
    Delivered,
    NoSubscriber,
}

/// Identifies one installed subscriber, see [`Dispatcher::on_unsubscribe_if`]. Holding it does
/// not keep the callback alive.
#[derive(Clone)]
pub struct Subscription(Weak<dyn Fn(&[u8]) + Send + Sync>);

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Subscription")
    }
}

#[derive(Clone, Debug)]
pub struct Dispatcher {
    registry: Registry,
}

fn display(b: &[u8]) -> String {
    String::from_utf8_lossy(b).into_owned()
}

impl Dispatcher {
    pub fn new(registry: Registry) -> Self {
        Dispatcher { registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Every registered characteristic in registration order.
    pub fn list(&self) -> Vec<Snapshot> {
        self.registry.snapshot()
    }

    pub fn on_read(&self, name: &str) -> Result<Vec<u8>> {
        let value = self.registry.with(name, |x| x.value.clone())?;
        debug!("[READ] {} <- {}", name, display(&value));
        Ok(value)
    }

    pub fn on_write(&self, name: &str, value: &[u8]) -> Result<()> {
        self.registry.with(name, |x| x.value = value.to_vec())?;
        debug!("[WRITE] {} -> {}", name, display(value));
        Ok(())
    }

    /// Install `callback` as the notification sink, replacing any previous subscriber.
    pub fn on_subscribe<F>(&self, name: &str, callback: F) -> Result<Subscription>
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        let callback: UpdateValueCallback = Arc::new(callback);
        let installed = callback.clone();
        let replaced = self
            .registry
            .with(name, |x| x.update_value_callback.replace(installed).is_some())?;
        if replaced {
            debug!("[SUBSCRIBE] {} (replacing previous subscriber)", name);
        } else {
            debug!("[SUBSCRIBE] {}", name);
        }
        Ok(Subscription(Arc::downgrade(&callback)))
    }

    pub fn on_unsubscribe(&self, name: &str) {
        match self.registry.with(name, |x| x.update_value_callback.take()) {
            Ok(Some(_)) => debug!("[UNSUBSCRIBE] {}", name),
            Ok(None) => {}
            Err(e) => debug!("ignoring unsubscribe: {}", e),
        }
    }

    /// Remove the subscriber only if it is still `subscription`. A subscriber that was replaced
    /// in the meantime stays installed.
    pub fn on_unsubscribe_if(&self, name: &str, subscription: &Subscription) -> bool {
        let removed = self.registry.with(name, |x| {
            let current = match &x.update_value_callback {
                Some(current) => current,
                None => return false,
            };
            let same = std::ptr::eq(
                Arc::as_ptr(current) as *const u8,
                subscription.0.as_ptr() as *const u8,
            );
            if !same {
                return false;
            }
            x.update_value_callback = None;
            true
        });
        match removed {
            Ok(true) => {
                debug!("[UNSUBSCRIBE] {}", name);
                true
            }
            Ok(false) => {
                debug!("subscriber of {} was already replaced", name);
                false
            }
            Err(e) => {
                debug!("ignoring unsubscribe: {}", e);
                false
            }
        }
    }

    /// Set the value and push it to the subscriber, if any.
    pub fn notify(&self, name: &str, value: &[u8]) -> Result<Notified> {
        let callback = self.registry.with(name, |x| {
            x.value = value.to_vec();
            x.update_value_callback.clone()
        })?;
        // called outside the registry lock, the sink may read back
        match callback {
            Some(callback) => {
                callback(value);
                debug!("[NOTIFY] {} -> {}", name, display(value));
                Ok(Notified::Delivered)
            }
            None => {
                warn!("no clients subscribed to {}", name);
                Ok(Notified::NoSubscriber)
            }
        }
    }

    /// Encode operator tokens with the characteristic's encoder, or as plain text when it has
    /// none. Does not change any state.
    pub fn encode_tokens<S: AsRef<str>>(&self, name: &str, tokens: &[S]) -> Result<Vec<u8>> {
        let config = self
            .registry
            .config(name)
            .ok_or_else(|| Error::UnknownCharacteristic(name.to_string()))?;
        if tokens.is_empty() {
            return Err(Error::InsufficientArguments(format!(
                "missing values for `{}`",
                name
            )));
        }
        match config.encoder_type() {
            Some(kind) => encoder::encode_tokens(kind, tokens),
            None => {
                let text: Vec<&str> = tokens.iter().map(|x| x.as_ref()).collect();
                Ok(text.join(" ").into_bytes())
            }
        }
    }

    pub fn write_tokens<S: AsRef<str>>(&self, name: &str, tokens: &[S]) -> Result<Vec<u8>> {
        let value = self.encode_tokens(name, tokens)?;
        self.on_write(name, &value)?;
        info!("write {} = {}", name, join(tokens));
        Ok(value)
    }

    pub fn notify_tokens<S: AsRef<str>>(
        &self,
        name: &str,
        tokens: &[S],
    ) -> Result<(Vec<u8>, Notified)> {
        let value = self.encode_tokens(name, tokens)?;
        let notified = self.notify(name, &value)?;
        info!("notify {} = {}", name, join(tokens));
        Ok((value, notified))
    }
}

fn join<S: AsRef<str>>(tokens: &[S]) -> String {
    tokens
        .iter()
        .map(|x| x.as_ref())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::config::{parse_uuid, CharacteristicConfig, EncoderRef, Property};

    fn dispatcher(chars: &[(&str, Option<&str>)]) -> Dispatcher {
        let registry = Registry::new();
        for (name, encoder) in chars {
            registry.register(Arc::new(CharacteristicConfig {
                uuid: parse_uuid("2a35").unwrap(),
                name: name.to_string(),
                properties: Property::Read | Property::Write | Property::Notify,
                initial: Some("init".to_string()),
                encoder: encoder.map(|x| EncoderRef {
                    kind: x.to_string(),
                }),
            }));
        }
        Dispatcher::new(registry)
    }

    #[test]
    fn write_then_read() {
        let d = dispatcher(&[("a", None), ("b", None)]);
        assert_eq!(d.on_read("a").unwrap(), b"init".to_vec());
        for value in [vec![], vec![0u8], vec![1, 2, 3, 0xff], b"text".to_vec()] {
            d.on_write("a", &value).unwrap();
            assert_eq!(d.on_read("a").unwrap(), value);
        }
        assert_eq!(d.on_read("b").unwrap(), b"init".to_vec());
    }

    #[test]
    fn unknown_characteristic() {
        let d = dispatcher(&[("a", None)]);
        assert!(matches!(
            d.on_read("A"),
            Err(Error::UnknownCharacteristic(x)) if x == "A"
        ));
        assert!(d.on_write("missing", b"x").is_err());
        assert!(d.on_subscribe("missing", |_| {}).is_err());
        assert!(d.notify("missing", b"x").is_err());
        d.on_unsubscribe("missing");
    }

    #[test]
    fn subscribe_notify_unsubscribe() {
        let d = dispatcher(&[("hr", None)]);
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        d.on_subscribe("hr", move |b| sink.lock().push(b.to_vec()))
            .unwrap();
        assert!(d.registry().with("hr", |x| x.is_subscribed()).unwrap());

        assert_eq!(d.notify("hr", &[72]).unwrap(), Notified::Delivered);
        assert_eq!(*received.lock(), vec![vec![72]]);

        d.on_unsubscribe("hr");
        d.on_unsubscribe("hr");
        assert!(!d.registry().with("hr", |x| x.is_subscribed()).unwrap());

        assert_eq!(d.notify("hr", &[80]).unwrap(), Notified::NoSubscriber);
        assert_eq!(d.on_read("hr").unwrap(), vec![80]);
        assert_eq!(received.lock().len(), 1);
    }

    #[test]
    fn second_subscriber_replaces_first() {
        let d = dispatcher(&[("hr", None)]);
        let first = Arc::new(Mutex::new(0));
        let second = Arc::new(Mutex::new(0));
        let (f, s) = (first.clone(), second.clone());
        d.on_subscribe("hr", move |_| *f.lock() += 1).unwrap();
        d.on_subscribe("hr", move |_| *s.lock() += 1).unwrap();
        d.notify("hr", &[1]).unwrap();
        assert_eq!(*first.lock(), 0);
        assert_eq!(*second.lock(), 1);
    }

    #[test]
    fn stale_subscriber_does_not_remove_replacement() {
        let d = dispatcher(&[("hr", None)]);
        let (send_a, mut recv_a) = tokio::sync::mpsc::unbounded_channel::<Vec<u8>>();
        let a = d
            .on_subscribe("hr", move |b| {
                send_a.send(b.to_vec()).ok();
            })
            .unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let b = d
            .on_subscribe("hr", move |b| sink.lock().push(b.to_vec()))
            .unwrap();

        // replacing the first subscriber dropped its sender
        assert!(matches!(
            recv_a.try_recv(),
            Err(tokio::sync::mpsc::error::TryRecvError::Disconnected)
        ));
        assert!(!d.on_unsubscribe_if("hr", &a));
        assert_eq!(d.notify("hr", &[60]).unwrap(), Notified::Delivered);
        assert_eq!(*received.lock(), vec![vec![60]]);

        assert!(d.on_unsubscribe_if("hr", &b));
        assert_eq!(d.notify("hr", &[61]).unwrap(), Notified::NoSubscriber);
        assert!(!d.on_unsubscribe_if("missing", &b));
    }

    #[test]
    fn callback_may_read_back() {
        let d = dispatcher(&[("hr", None)]);
        let inner = d.clone();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        d.on_subscribe("hr", move |_| {
            *sink.lock() = inner.on_read("hr").unwrap();
        })
        .unwrap();
        d.notify("hr", b"new").unwrap();
        assert_eq!(*seen.lock(), b"new".to_vec());
    }

    #[test]
    fn tokens_with_encoder() {
        let d = dispatcher(&[("bp", Some("blood-pressure")), ("label", None)]);
        let value = d.write_tokens("bp", &["120", "80", "72"]).unwrap();
        assert_eq!(value.len(), 9);
        assert_eq!(d.on_read("bp").unwrap(), value);

        d.write_tokens("label", &["hello", "there"]).unwrap();
        assert_eq!(d.on_read("label").unwrap(), b"hello there".to_vec());
    }

    #[test]
    fn bad_tokens_leave_value_unchanged() {
        let d = dispatcher(&[("bp", Some("blood-pressure")), ("odd", Some("glucose"))]);
        assert!(matches!(
            d.write_tokens("bp", &["120"]),
            Err(Error::InsufficientArguments(_))
        ));
        assert!(matches!(
            d.notify_tokens("bp", &["a", "b", "c"]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            d.write_tokens::<&str>("bp", &[]),
            Err(Error::InsufficientArguments(_))
        ));
        assert!(matches!(
            d.write_tokens("odd", &["5.4"]),
            Err(Error::UnknownEncoder(_))
        ));
        assert_eq!(d.on_read("bp").unwrap(), b"init".to_vec());
        assert_eq!(d.on_read("odd").unwrap(), b"init".to_vec());
    }

    #[test]
    fn out_of_range_write_keeps_value() {
        let d = dispatcher(&[("weight", Some("weight-scale")), ("bp", Some("blood-pressure"))]);
        assert!(matches!(
            d.write_tokens("weight", &["400"]),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(d.on_read("weight").unwrap(), b"init".to_vec());

        let value = d.write_tokens("bp", &["1e19", "1e19", "72"]).unwrap();
        assert_eq!(value.len(), 9);
    }

    #[test]
    fn notify_tokens_without_subscriber_updates_value() {
        let d = dispatcher(&[("level", Some("battery-level"))]);
        let (value, notified) = d.notify_tokens("level", &["150"]).unwrap();
        assert_eq!(value, vec![100]);
        assert_eq!(notified, Notified::NoSubscriber);
        assert_eq!(d.on_read("level").unwrap(), vec![100]);
    }

    #[test]
    fn list_in_registration_order() {
        let d = dispatcher(&[("z", Some("uint8")), ("a", None)]);
        d.on_subscribe("a", |_: &[u8]| {}).unwrap();
        let list = d.list();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].name, "z");
        assert_eq!(list[0].encoder.as_deref(), Some("uint8"));
        assert!(!list[0].subscribed);
        assert_eq!(list[1].value, b"init".to_vec());
        assert!(list[1].subscribed);
    }
}
