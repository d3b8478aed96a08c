//! Keyboard fan-out for editing sessions.
//!
//! A session subscribes when it opens and holds the returned
//! [`KeySubscription`]; dropping it unregisters the listener, so a closed
//! editor never sees another key press.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, Weak};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EditorKey {
    Escape,
}

#[derive(Debug, Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(u64, EditorKey, Sender<EditorKey>)>,
}

#[derive(Clone, Debug, Default)]
pub struct KeyBus {
    inner: Arc<Mutex<Listeners>>,
}

impl KeyBus {
    pub fn new() -> Self { Self::default() }

    pub fn subscribe(&self, key: EditorKey) -> KeySubscription {
        let (tx, rx) = mpsc::channel();
        let id = match self.inner.lock() {
            Ok(mut l) => {
                l.next_id += 1;
                let id = l.next_id;
                l.entries.push((id, key, tx));
                id
            }
            Err(_) => {
                log::warn!("key bus lock poisoned; subscription will stay silent");
                0
            }
        };
        KeySubscription { id, rx, bus: Arc::downgrade(&self.inner) }
    }

    /// Deliver a key press to every live listener for that key. Returns how
    /// many listeners received it.
    pub fn dispatch(&self, key: EditorKey) -> usize {
        let Ok(mut l) = self.inner.lock() else { return 0 };
        let mut delivered = 0;
        // a listener whose receiver is gone is pruned here
        l.entries.retain(|(_, k, tx)| {
            if *k != key { return true; }
            match tx.send(key) {
                Ok(()) => { delivered += 1; true }
                Err(_) => false,
            }
        });
        delivered
    }

    pub fn listener_count(&self) -> usize {
        self.inner.lock().map(|l| l.entries.len()).unwrap_or(0)
    }
}

#[derive(Debug)]
pub struct KeySubscription {
    id: u64,
    rx: Receiver<EditorKey>,
    bus: Weak<Mutex<Listeners>>,
}

impl KeySubscription {
    /// Number of presses received since the last call.
    pub fn drain(&self) -> usize {
        self.rx.try_iter().count()
    }
}

impl Drop for KeySubscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            if let Ok(mut l) = bus.lock() {
                l.entries.retain(|(id, _, _)| *id != self.id);
            }
        }
    }
}
