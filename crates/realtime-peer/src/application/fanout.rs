//! Multi-consumer fan-out.
//!
//! A [`Broadcaster`] hands every published value to every live
//! [`Subscription`], in publish order.  Each subscriber has its own queue, so
//! a slow consumer never delays the others.  Subscriptions are registered
//! under a fresh [`Uuid`] and are pruned as soon as their receiving side is
//! gone (dropped or [`Subscription::close`]d), so memory does not grow with
//! abandoned consumers.
//!
//! Queues are unbounded by default.  With a capacity configured, a subscriber
//! whose queue is full misses the value (drop-newest) and a warning is logged;
//! the subscription itself stays registered.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

enum Sink<T> {
    Unbounded(mpsc::UnboundedSender<T>),
    Bounded(mpsc::Sender<T>),
}

enum Source<T> {
    Unbounded(mpsc::UnboundedReceiver<T>),
    Bounded(mpsc::Receiver<T>),
}

/// Publish side of a fan-out.
pub struct Broadcaster<T> {
    subscribers: Mutex<HashMap<Uuid, Sink<T>>>,
    capacity: Option<usize>,
}

impl<T: Clone> Broadcaster<T> {
    /// `capacity` bounds each subscriber's queue; `None` means unbounded.
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            capacity: capacity.map(|c| c.max(1)),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(None)
    }

    /// Registers a new consumer.  It receives every value published from now
    /// on, and nothing published before.
    pub fn subscribe(&self) -> Subscription<T> {
        let id = Uuid::new_v4();
        let (sink, source) = match self.capacity {
            Some(capacity) => {
                let (tx, rx) = mpsc::channel(capacity);
                (Sink::Bounded(tx), Source::Bounded(rx))
            }
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                (Sink::Unbounded(tx), Source::Unbounded(rx))
            }
        };
        self.lock().insert(id, sink);
        debug!("subscriber {id} registered");
        Subscription { id, source }
    }

    /// Delivers `value` to every live subscriber.  Returns how many received
    /// it.
    pub fn publish(&self, value: T) -> usize {
        let mut delivered = 0;
        self.lock().retain(|id, sink| {
            let alive = match sink {
                Sink::Unbounded(tx) => match tx.send(value.clone()) {
                    Ok(()) => {
                        delivered += 1;
                        true
                    }
                    Err(_) => false,
                },
                Sink::Bounded(tx) => match tx.try_send(value.clone()) {
                    Ok(()) => {
                        delivered += 1;
                        true
                    }
                    Err(TrySendError::Full(_)) => {
                        warn!("subscriber {id} is lagging; value dropped");
                        true
                    }
                    Err(TrySendError::Closed(_)) => false,
                },
            };
            if !alive {
                debug!("subscriber {id} terminated; removed");
            }
            alive
        });
        delivered
    }

    /// Number of live subscribers.  Terminated ones are pruned first.
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.lock();
        subscribers.retain(|_, sink| match sink {
            Sink::Unbounded(tx) => !tx.is_closed(),
            Sink::Bounded(tx) => !tx.is_closed(),
        });
        subscribers.len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Sink<T>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> Default for Broadcaster<T> {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// Receive side of one consumer.  Dropping it unsubscribes.
pub struct Subscription<T> {
    id: Uuid,
    source: Source<T>,
}

impl<T> Subscription<T> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Waits for the next value.  Returns `None` once the subscription is
    /// closed and drained, or the broadcaster is gone.
    pub async fn recv(&mut self) -> Option<T> {
        match &mut self.source {
            Source::Unbounded(rx) => rx.recv().await,
            Source::Bounded(rx) => rx.recv().await,
        }
    }

    /// Returns a queued value without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        match &mut self.source {
            Source::Unbounded(rx) => rx.try_recv().ok(),
            Source::Bounded(rx) => rx.try_recv().ok(),
        }
    }

    /// Stops receiving new values.  Values already queued can still be read.
    pub fn close(&mut self) {
        match &mut self.source {
            Source::Unbounded(rx) => rx.close(),
            Source::Bounded(rx) => rx.close(),
        }
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        match &mut self.get_mut().source {
            Source::Unbounded(rx) => rx.poll_recv(cx),
            Source::Bounded(rx) => rx.poll_recv(cx),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
