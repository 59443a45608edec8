use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::delta::IslandDelta;
use crate::entity::handle::Entity;
use crate::material::MaterialTable;
use crate::math::Vec3;
use crate::settings::Settings;

/// Everything that can travel between the coordinator and an island worker.
/// Dispatch is a match on this closed enumeration; there is no dynamic sink
/// registry.
#[derive(Debug)]
pub enum Message {
    /// Change feed, both directions.
    IslandDelta(IslandDelta),
    // Coordinator -> worker.
    SetPaused(bool),
    StepSimulation,
    SetSettings(Settings),
    SetMaterialTable(MaterialTable),
    SetCenterOfMass { entity: Entity, com: Vec3 },
    WakeUpIsland,
    /// Worker -> coordinator, advisory: the island is no longer a single
    /// connected component and the worker has suspended itself.
    SplitIsland,
}

/// One half of a bidirectional intra-process message link. Each side owns
/// its inbox; sending appends to the peer's inbox under its lock, receiving
/// drains the own inbox under the same lock. Messages are moved, never
/// copied, and delivery on a single link is FIFO.
pub struct MessageChannel {
    inbox: Arc<Mutex<VecDeque<Message>>>,
    peer: Arc<Mutex<VecDeque<Message>>>,
}

impl MessageChannel {
    /// Creates the two connected halves of a link.
    pub fn pair() -> (MessageChannel, MessageChannel) {
        let a = Arc::new(Mutex::new(VecDeque::new()));
        let b = Arc::new(Mutex::new(VecDeque::new()));
        (
            MessageChannel {
                inbox: a.clone(),
                peer: b.clone(),
            },
            MessageChannel { inbox: b, peer: a },
        )
    }

    pub fn send(&self, message: Message) {
        self.peer
            .lock()
            .expect("message inbox lock poisoned")
            .push_back(message);
    }

    /// Moves every queued message out of the inbox.
    pub fn drain(&self) -> Vec<Message> {
        let mut inbox = self.inbox.lock().expect("message inbox lock poisoned");
        inbox.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.inbox
            .lock()
            .expect("message inbox lock poisoned")
            .is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_delivered_fifo() {
        let (coordinator, worker) = MessageChannel::pair();
        coordinator.send(Message::SetPaused(true));
        coordinator.send(Message::StepSimulation);
        coordinator.send(Message::WakeUpIsland);

        let drained = worker.drain();
        assert_eq!(drained.len(), 3);
        assert!(matches!(drained[0], Message::SetPaused(true)));
        assert!(matches!(drained[1], Message::StepSimulation));
        assert!(matches!(drained[2], Message::WakeUpIsland));
        assert!(worker.drain().is_empty());
    }

    #[test]
    fn link_is_bidirectional() {
        let (coordinator, worker) = MessageChannel::pair();
        worker.send(Message::SplitIsland);
        let drained = coordinator.drain();
        assert!(matches!(drained[0], Message::SplitIsland));
        assert!(coordinator.is_empty());
    }
}
