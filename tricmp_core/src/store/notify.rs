use crossbeam::channel::{self, Receiver, Sender};
use serde::Serialize;
use std::sync::{Arc, Mutex, RwLock};
use tricmp_common::{DiffCode, ItemHandle};

/// Payload fired after an evaluation is committed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiffCodeChange {
    pub handle: ItemHandle,
    pub old: DiffCode,
    pub new: DiffCode,
}

impl DiffCodeChange {
    pub fn is_change(&self) -> bool {
        self.old != self.new
    }
}

type Callback = Arc<dyn Fn(&DiffCodeChange) + Send + Sync>;

/// Fan-out of commit events to channel subscribers and callbacks
#[derive(Default)]
pub struct Notifier {
    senders: Mutex<Vec<Sender<DiffCodeChange>>>,
    callbacks: RwLock<Vec<Callback>>,
}

impl Notifier {
    pub fn subscribe(&self) -> Receiver<DiffCodeChange> {
        let (tx, rx) = channel::unbounded();
        if let Ok(mut senders) = self.senders.lock() {
            senders.push(tx);
        }
        rx
    }

    pub fn on_change<F>(&self, callback: F)
    where
        F: Fn(&DiffCodeChange) + Send + Sync + 'static,
    {
        if let Ok(mut callbacks) = self.callbacks.write() {
            callbacks.push(Arc::new(callback));
        }
    }

    pub fn notify(&self, change: DiffCodeChange) {
        // Callbacks run unlocked so they may register further callbacks
        let callbacks: Vec<Callback> = match self.callbacks.read() {
            Ok(callbacks) => callbacks.clone(),
            Err(_) => Vec::new(),
        };
        for callback in &callbacks {
            callback(&change);
        }
        // Dropped receivers unsubscribe themselves
        if let Ok(mut senders) = self.senders.lock() {
            senders.retain(|tx| tx.send(change).is_ok());
        }
    }
}
