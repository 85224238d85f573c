use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use log::info;

use crate::config::ControlBinding;
use crate::error::ConnectError;

/// Called with `(connected, remote description)` on every connectivity change.
pub type ConnectionListener = Box<dyn Fn(bool, &str) + Send + Sync>;

/// The remote key-value store shared with the device under test.
///
/// Reads never fail: a missing key (or one holding the other type) yields the
/// supplied default. Every method takes `&self`; implementations handle their
/// own synchronisation.
pub trait TelemetryPort {
    fn on_connection_change(&self, listener: ConnectionListener);
    fn get_boolean(&self, table: &str, key: &str, default: bool) -> bool;
    fn get_double(&self, table: &str, key: &str, default: f64) -> f64;
    fn put_boolean(&self, table: &str, key: &str, value: bool);
    fn put_double(&self, table: &str, key: &str, value: f64);

    fn read_flag(&self, binding: &ControlBinding) -> bool {
        self.get_boolean(&binding.table, &binding.entry, false)
    }

    fn write_flag(&self, binding: &ControlBinding, value: bool) {
        self.put_boolean(&binding.table, &binding.entry, value)
    }
}

impl<T: TelemetryPort + ?Sized> TelemetryPort for Arc<T> {
    fn on_connection_change(&self, listener: ConnectionListener) {
        (**self).on_connection_change(listener)
    }
    fn get_boolean(&self, table: &str, key: &str, default: bool) -> bool {
        (**self).get_boolean(table, key, default)
    }
    fn get_double(&self, table: &str, key: &str, default: f64) -> f64 {
        (**self).get_double(table, key, default)
    }
    fn put_boolean(&self, table: &str, key: &str, value: bool) {
        (**self).put_boolean(table, key, value)
    }
    fn put_double(&self, table: &str, key: &str, value: f64) {
        (**self).put_double(table, key, value)
    }
}

/// Blocks until the transport reports connectivity once.
///
/// There is no timeout: an absent device is a valid thing to wait for.
pub fn wait_for_connection<P: TelemetryPort + ?Sized>(port: &P) -> Result<(), ConnectError> {
    let (tx, rx) = mpsc::sync_channel::<()>(1);
    let tx = Mutex::new(Some(tx));
    port.on_connection_change(Box::new(move |connected: bool, remote: &str| {
        info!("{}; Connected={}", remote, connected);
        if let Ok(mut slot) = tx.lock() {
            if let Some(tx) = slot.take() {
                let _ = tx.try_send(());
            }
        }
    }));
    info!("Waiting");
    rx.recv().map_err(|_| ConnectError)?;
    info!("Connected!");
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StoredValue {
    Boolean(bool),
    Double(f64),
}

struct StoreInner {
    address: String,
    connected: bool,
    entries: HashMap<String, StoredValue>,
    listeners: Vec<Arc<ConnectionListener>>,
}

/// In-process telemetry store.
///
/// Cloning is cheap and every clone shares the same entries, so the
/// collector and a simulated device can hold one each.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl MemoryStore {
    pub fn connect(address: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner {
                address: address.into(),
                connected: false,
                entries: HashMap::new(),
                listeners: Vec::new(),
            })),
        }
    }

    pub fn address(&self) -> String {
        self.inner
            .lock()
            .map(|inner| inner.address.clone())
            .unwrap_or_default()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().map(|inner| inner.connected).unwrap_or(false)
    }

    /// Flips connectivity and notifies listeners outside the lock.
    pub fn set_connected(&self, connected: bool, remote: &str) {
        let listeners = match self.inner.lock() {
            Ok(mut inner) => {
                if inner.connected == connected {
                    return;
                }
                inner.connected = connected;
                inner.listeners.clone()
            }
            Err(_) => return,
        };
        for listener in listeners {
            (**listener)(connected, remote);
        }
    }

    pub fn get(&self, table: &str, key: &str) -> Option<StoredValue> {
        self.inner
            .lock()
            .ok()
            .and_then(|inner| inner.entries.get(&entry_key(table, key)).copied())
    }

    /// Sorted copy of every entry, keyed by full path.
    pub fn snapshot(&self) -> Vec<(String, StoredValue)> {
        let mut entries: Vec<_> = self
            .inner
            .lock()
            .map(|inner| inner.entries.iter().map(|(k, v)| (k.clone(), *v)).collect())
            .unwrap_or_default();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    fn put(&self, table: &str, key: &str, value: StoredValue) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.entries.insert(entry_key(table, key), value);
        }
    }
}

fn entry_key(table: &str, key: &str) -> String {
    format!(
        "/{}/{}",
        table.trim_matches('/'),
        key.trim_start_matches('/')
    )
}

impl TelemetryPort for MemoryStore {
    fn on_connection_change(&self, listener: ConnectionListener) {
        let listener = Arc::new(listener);
        let (connected, address) = match self.inner.lock() {
            Ok(mut inner) => {
                inner.listeners.push(Arc::clone(&listener));
                (inner.connected, inner.address.clone())
            }
            Err(_) => return,
        };
        if connected {
            (**listener)(true, &address);
        }
    }

    fn get_boolean(&self, table: &str, key: &str, default: bool) -> bool {
        match self.get(table, key) {
            Some(StoredValue::Boolean(b)) => b,
            _ => default,
        }
    }

    fn get_double(&self, table: &str, key: &str, default: f64) -> f64 {
        match self.get(table, key) {
            Some(StoredValue::Double(v)) => v,
            _ => default,
        }
    }

    fn put_boolean(&self, table: &str, key: &str, value: bool) {
        self.put(table, key, StoredValue::Boolean(value))
    }

    fn put_double(&self, table: &str, key: &str, value: f64) {
        self.put(table, key, StoredValue::Double(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn missing_keys_and_wrong_types_return_default() {
        let store = MemoryStore::connect("127.0.0.1");
        assert!(store.get_boolean("Robot", "enabled", true));
        assert_eq!(store.get_double("Robot", "speed", 4.5), 4.5);

        store.put_double("Robot", "enabled", 1.0);
        assert!(!store.get_boolean("Robot", "enabled", false));
        assert_eq!(store.get_double("Robot", "enabled", 0.0), 1.0);
    }

    #[test]
    fn clones_share_entries_and_paths_normalise() {
        let store = MemoryStore::connect("sim");
        let other = store.clone();
        other.put_boolean("Shuffleboard/Drive/", "DataCollection", true);
        assert!(store.get_boolean("Shuffleboard/Drive", "DataCollection", false));
        assert_eq!(
            store.snapshot(),
            vec![(
                "/Shuffleboard/Drive/DataCollection".to_string(),
                StoredValue::Boolean(true)
            )]
        );
    }

    #[test]
    fn listener_registered_after_connect_fires_immediately() {
        let store = MemoryStore::connect("sim");
        store.set_connected(true, "robot");
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        store.on_connection_change(Box::new(move |connected: bool, _remote: &str| {
            assert!(connected);
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // repeated notifications of the same state are dropped
        store.set_connected(true, "robot");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        store.set_connected(false, "robot");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn wait_for_connection_blocks_until_notified() {
        let store = MemoryStore::connect("sim");
        let remote = store.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.set_connected(true, "robot");
        });
        wait_for_connection(&store).unwrap();
        assert!(store.is_connected());
        handle.join().unwrap();
    }
}
