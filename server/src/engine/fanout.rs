use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use dashmap::DashMap;
use futures_util::Stream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use super::events::MessageView;

/// Default per-subscriber queue depth.
pub const DEFAULT_SUBSCRIBER_QUEUE: usize = 256;

pub type SubscriberId = u64;

struct Subscriber {
    id: SubscriberId,
    outbound: mpsc::Sender<Arc<MessageView>>,
}

struct HubInner {
    /// Live subscribers keyed by channel id. A publish only ever looks at
    /// the entry for the message's own channel.
    channels: DashMap<String, Vec<Subscriber>>,
    queue: usize,
    next_id: AtomicU64,
}

impl HubInner {
    fn remove(&self, channel_id: &str, id: SubscriberId) -> bool {
        let removed = match self.channels.get_mut(channel_id) {
            Some(mut subs) => {
                let before = subs.len();
                subs.retain(|s| s.id != id);
                subs.len() != before
            }
            None => false,
        };
        // The shard guard above is released before this second lookup.
        self.channels.remove_if(channel_id, |_, subs| subs.is_empty());
        removed
    }
}

/// In-process registry of live channel subscriptions.
///
/// Registration, removal, and publish all go through the per-channel
/// entry's shard lock, so a publish sees a subscriber either fully
/// registered or not at all. Delivery uses `try_send` on a bounded queue:
/// a subscriber that falls behind is evicted instead of slowing anyone else.
#[derive(Clone)]
pub struct MessageHub {
    inner: Arc<HubInner>,
}

impl MessageHub {
    pub fn new(queue: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                channels: DashMap::new(),
                queue: queue.max(1),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register interest in a channel. The registration lasts until the
    /// returned handle is dropped or `unsubscribe` is called.
    pub fn subscribe(&self, channel_id: &str) -> ChannelSubscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.queue);

        self.inner
            .channels
            .entry(channel_id.to_string())
            .or_default()
            .push(Subscriber { id, outbound: tx });

        debug!(%channel_id, subscriber = id, "subscriber registered");
        ChannelSubscription {
            id,
            channel_id: channel_id.to_string(),
            rx,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Remove a registration. Returns false if it was already gone.
    pub fn unsubscribe(&self, channel_id: &str, id: SubscriberId) -> bool {
        let removed = self.inner.remove(channel_id, id);
        if removed {
            debug!(%channel_id, subscriber = id, "subscriber removed");
        }
        removed
    }

    /// Deliver a persisted message to every subscriber of its channel.
    /// Returns how many subscribers accepted it.
    pub fn publish(&self, message: MessageView) -> usize {
        let channel_id = message.channel_id.clone();
        let message = Arc::new(message);
        let mut delivered = 0;
        let mut evicted = Vec::new();

        if let Some(subs) = self.inner.channels.get(&channel_id) {
            for sub in subs.iter() {
                match sub.outbound.try_send(Arc::clone(&message)) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        warn!(%channel_id, subscriber = sub.id, "subscriber queue full, evicting");
                        evicted.push(sub.id);
                    }
                    Err(TrySendError::Closed(_)) => evicted.push(sub.id),
                }
            }
        }

        for id in evicted {
            self.inner.remove(&channel_id, id);
        }
        delivered
    }

    /// Drop every subscription on a channel, ending their streams.
    pub fn close_channel(&self, channel_id: &str) -> usize {
        match self.inner.channels.remove(channel_id) {
            Some((_, subs)) => subs.len(),
            None => 0,
        }
    }

    pub fn subscriber_count(&self, channel_id: &str) -> usize {
        self.inner
            .channels
            .get(channel_id)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    /// Number of channels with at least one live subscriber.
    #[cfg(test)]
    pub fn active_channels(&self) -> usize {
        self.inner.channels.len()
    }
}

impl Default for MessageHub {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_QUEUE)
    }
}

/// A live subscription to one channel. Yields messages in publish order and
/// ends once the hub drops the registration. Dropping it unregisters.
#[derive(Debug)]
pub struct ChannelSubscription {
    id: SubscriberId,
    channel_id: String,
    rx: mpsc::Receiver<Arc<MessageView>>,
    hub: Weak<HubInner>,
}

impl ChannelSubscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Wait for the next message. `None` once the subscription has ended.
    pub async fn recv(&mut self) -> Option<Arc<MessageView>> {
        self.rx.recv().await
    }
}

impl Stream for ChannelSubscription {
    type Item = Arc<MessageView>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for ChannelSubscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(&self.channel_id, self.id);
        }
    }
}
