// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded multi-consumer queue between the tailer and the sink workers.

use crate::errors::ChannelError;
use crate::event::Event;
use derive_more::Display;
use flume::{Receiver, Sender, TrySendError};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// What the producer does when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum FullQueuePolicy {
    /// Wait for a consumer to make room.
    #[display("block")]
    Block,
    /// Discard the item being sent.
    #[display("drop_newest")]
    DropNewest,
    /// Discard the oldest queued item to make room.
    #[display("drop_oldest")]
    DropOldest,
}

impl FromStr for FullQueuePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "block" => Ok(FullQueuePolicy::Block),
            "drop_newest" => Ok(FullQueuePolicy::DropNewest),
            "drop_oldest" => Ok(FullQueuePolicy::DropOldest),
            other => Err(format!(
                "unknown full queue policy {other}, expected block, drop_newest or drop_oldest"
            )),
        }
    }
}

pub type EventSender = BoundedSender<Event>;
pub type EventReceiver = BoundedReceiver<Event>;

pub struct BoundedSender<T> {
    tx: Sender<T>,
    // only held under DropOldest, does not count as a consumer
    evict: Option<Receiver<T>>,
    policy: FullQueuePolicy,
    dropped: Arc<AtomicU64>,
}

impl<T> BoundedSender<T> {
    /// Queues `item` according to the full-queue policy. Fails with
    /// `Disconnected` once every receiver is gone.
    pub async fn send(&self, item: T) -> Result<(), ChannelError> {
        if self.is_disconnected() {
            return Err(ChannelError::Disconnected);
        }
        match (self.policy, &self.evict) {
            (FullQueuePolicy::DropOldest, Some(evict)) => {
                let mut item = item;
                loop {
                    match self.tx.try_send(item) {
                        Ok(()) => return Ok(()),
                        Err(TrySendError::Full(rejected)) => {
                            if self.is_disconnected() {
                                return Err(ChannelError::Disconnected);
                            }
                            if evict.try_recv().is_ok() {
                                self.record_drop();
                            }
                            item = rejected;
                        }
                        Err(TrySendError::Disconnected(_)) => {
                            return Err(ChannelError::Disconnected)
                        }
                    }
                }
            }
            (FullQueuePolicy::DropNewest, _) => match self.tx.try_send(item) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => {
                    self.record_drop();
                    Ok(())
                }
                Err(TrySendError::Disconnected(_)) => Err(ChannelError::Disconnected),
            },
            _ => self
                .tx
                .send_async(item)
                .await
                .map_err(|_| ChannelError::Disconnected),
        }
    }

    fn is_disconnected(&self) -> bool {
        let own = usize::from(self.evict.is_some());
        self.tx.receiver_count() <= own
    }

    fn record_drop(&self) {
        let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            "Event queue full, dropped an event under {} policy ({total} dropped so far)",
            self.policy
        );
    }

    /// Number of items discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

impl<T> Clone for BoundedSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            evict: self.evict.clone(),
            policy: self.policy,
            dropped: Arc::clone(&self.dropped),
        }
    }
}

/// Receiving end. Clones share the queue, each item goes to exactly one of
/// them.
#[derive(Clone)]
pub struct BoundedReceiver<T> {
    rx: Receiver<T>,
}

impl<T> BoundedReceiver<T> {
    /// Waits for the next item. `None` once every sender is gone and the
    /// queue is drained.
    pub async fn recv(&self) -> Option<T> {
        self.rx.recv_async().await.ok()
    }

    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

pub fn bounded<T>(
    capacity: usize,
    policy: FullQueuePolicy,
) -> (BoundedSender<T>, BoundedReceiver<T>) {
    let (tx, rx) = flume::bounded::<T>(capacity.max(1));
    let evict = (policy == FullQueuePolicy::DropOldest).then(|| rx.clone());
    let sender = BoundedSender {
        tx,
        evict,
        policy,
        dropped: Arc::new(AtomicU64::new(0)),
    };
    (sender, BoundedReceiver { rx })
}
