use crate::models::MeterReading;
use log::{debug, info};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc::{self, error::TrySendError, Receiver, Sender};

pub type SubscriberId = u64;

pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 16;

/// Receiving end handed out by [`ReadingHub::subscribe`].
pub struct Subscription {
    pub id: SubscriberId,
    pub receiver: Receiver<Arc<MeterReading>>,
}

/// ReadingHub keeps the latest reading and pushes new ones to all subscribers
pub struct ReadingHub {
    latest: RwLock<Option<Arc<MeterReading>>>,
    subscribers: Mutex<HashMap<SubscriberId, Sender<Arc<MeterReading>>>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl ReadingHub {
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_SUBSCRIBER_BUFFER)
    }

    /// `buffer` is the number of readings a subscriber may fall behind before it is dropped
    pub fn with_buffer(buffer: usize) -> Self {
        ReadingHub {
            latest: RwLock::new(None),
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    /// Replace the latest reading and hand it to every subscriber.
    ///
    /// Delivery never waits: a subscriber whose channel is closed or full is
    /// removed and the remaining subscribers still get the reading.
    pub fn publish(&self, reading: MeterReading) {
        let reading = Arc::new(reading);

        {
            let mut latest = self.latest.write().unwrap_or_else(|e| e.into_inner());
            *latest = Some(reading.clone());
        }

        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|id, sender| match sender.try_send(reading.clone()) {
            Ok(_) => true,
            Err(TrySendError::Closed(_)) => {
                info!("Subscriber {id} is gone, removing it");
                false
            }
            Err(TrySendError::Full(_)) => {
                info!("Subscriber {id} does not keep up, removing it");
                false
            }
        });

        debug!("Reading {} delivered to {} subscribers", reading.timestamp, subscribers.len());
    }

    /// Copy of the latest reading, `None` until the first telegram was decoded.
    pub fn snapshot(&self) -> Option<MeterReading> {
        let latest = self.latest.read().unwrap_or_else(|e| e.into_inner());
        latest.as_ref().map(|r| r.as_ref().clone())
    }

    /// Register a new subscriber. Only readings published from now on are
    /// delivered, callers wanting the current one ask [`Self::snapshot`].
    pub fn subscribe(&self) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.buffer);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.subscribers.lock().unwrap_or_else(|e| e.into_inner()).insert(id, sender);
        info!("Subscriber {id} added");

        Subscription { id, receiver }
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        if self.subscribers.lock().unwrap_or_else(|e| e.into_inner()).remove(&id).is_some() {
            info!("Subscriber {id} removed");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for ReadingHub {
    fn default() -> Self {
        Self::new()
    }
}
