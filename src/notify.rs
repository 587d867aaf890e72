use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Per-asset broadcast of committed events, so collaborators know when to reload.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to events touching an asset. Creates the channel if needed.
    pub fn subscribe(&self, asset_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(asset_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// No-op if nobody is listening. Channels whose receivers are all gone are dropped.
    pub fn send(&self, asset_id: Ulid, event: &Event) {
        let closed = match self.channels.get(&asset_id) {
            Some(sender) => sender.send(event.clone()).is_err(),
            None => false,
        };
        if closed {
            self.channels
                .remove_if(&asset_id, |_, sender| sender.receiver_count() == 0);
        }
    }

    /// Deliver to every subscribed asset.
    pub fn send_all(&self, event: &Event) {
        self.channels.retain(|_, sender| sender.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Asset, AssetCategory};

    fn registered(id: Ulid) -> Event {
        Event::AssetRegistered {
            asset: Asset::new(id, "V1", AssetCategory::Vehicle),
        }
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let asset = Ulid::new();
        let mut rx = hub.subscribe(asset);

        let event = registered(asset);
        hub.send(asset, &event);

        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn other_assets_not_delivered() {
        let hub = NotifyHub::new();
        let mine = Ulid::new();
        let mut rx = hub.subscribe(mine);
        let other = Ulid::new();
        hub.send(other, &registered(other));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_all_reaches_every_channel() {
        let hub = NotifyHub::new();
        let mut a = hub.subscribe(Ulid::new());
        let mut b = hub.subscribe(Ulid::new());
        let event = registered(Ulid::new());
        hub.send_all(&event);
        assert_eq!(a.recv().await.unwrap(), event);
        assert_eq!(b.recv().await.unwrap(), event);
    }

    #[test]
    fn dropped_receivers_release_channel() {
        let hub = NotifyHub::new();
        let asset = Ulid::new();
        drop(hub.subscribe(asset));
        hub.send(asset, &registered(asset));
        assert!(hub.channels.is_empty());
    }
}
