//! Attached-channel bookkeeping for receivable stores

use crate::peer::{ChannelLink, DataChannelState};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// State of one attached channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelStatus {
    pub label: String,
    pub connected: bool,
    pub state: DataChannelState,
}

/// Channels currently feeding a store, keyed by label
///
/// A store may be fed by several labels at once (parallel feeds). Data
/// arriving for a label that is not attached is dropped, which is what stops
/// a torn-down connection from mutating the store.
#[derive(Default)]
pub struct ReceiverCore {
    links: RwLock<BTreeMap<String, Arc<dyn ChannelLink>>>,
}

impl ReceiverCore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a channel, replacing any previous link with the same label
    pub fn attach(&self, link: Arc<dyn ChannelLink>) {
        let label = link.label().to_string();
        debug!(label = %label, "Attaching receive channel");
        self.links.write().insert(label, link);
    }

    pub fn detach(&self, label: &str) -> bool {
        let removed = self.links.write().remove(label).is_some();
        if removed {
            debug!(label = %label, "Detached receive channel");
        }
        removed
    }

    /// Detach everything; returns how many channels were attached
    pub fn detach_all(&self) -> usize {
        let mut links = self.links.write();
        let count = links.len();
        links.clear();
        count
    }

    pub fn accepts(&self, label: &str) -> bool {
        self.links.read().contains_key(label)
    }

    pub fn is_channel_connected(&self, label: Option<&str>) -> bool {
        let links = self.links.read();
        match label {
            Some(label) => links.get(label).is_some_and(|link| link.is_open()),
            None => !links.is_empty() && links.values().all(|link| link.is_open()),
        }
    }

    pub fn has_any_connected_channel(&self) -> bool {
        self.links.read().values().any(|link| link.is_open())
    }

    pub fn channel_states(&self) -> Vec<ChannelStatus> {
        self.links
            .read()
            .iter()
            .map(|(label, link)| {
                let state = link.state();
                ChannelStatus {
                    label: label.clone(),
                    connected: state == DataChannelState::Open,
                    state,
                }
            })
            .collect()
    }

    pub fn attached_labels(&self) -> Vec<String> {
        self.links.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::testing::FakeLink;

    #[test]
    fn test_no_channels_is_not_connected() {
        let core = ReceiverCore::new();
        assert!(!core.is_channel_connected(None));
        assert!(!core.has_any_connected_channel());
    }

    #[test]
    fn test_connectivity_per_label() {
        let core = ReceiverCore::new();
        let a = FakeLink::open("r1:lidar");
        let b = FakeLink::connecting("r1:lidar_2");
        core.attach(a.clone());
        core.attach(b.clone());

        assert!(core.is_channel_connected(Some("r1:lidar")));
        assert!(!core.is_channel_connected(Some("r1:lidar_2")));
        assert!(!core.is_channel_connected(None));
        assert!(core.has_any_connected_channel());

        b.set_state(DataChannelState::Open);
        assert!(core.is_channel_connected(None));

        let states = core.channel_states();
        assert_eq!(states.len(), 2);
        assert!(states.iter().all(|s| s.connected));
    }

    #[test]
    fn test_detach_stops_accepting() {
        let core = ReceiverCore::new();
        core.attach(FakeLink::open("r1:gps"));
        assert!(core.accepts("r1:gps"));
        assert!(core.detach("r1:gps"));
        assert!(!core.accepts("r1:gps"));
        assert!(!core.detach("r1:gps"));
    }
}
