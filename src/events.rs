//! Engine-wide node event queue.
//!
//! Nodes do not carry per-instance emitters; every event is pushed into one
//! queue keyed by [`NodeId`] and drained by the application between frames.
//! Events fire synchronously from the mutation that caused them, except
//! `Loaded`/`Failed` for externally fetched resources, which are delivered
//! when their completion is processed.

use std::collections::VecDeque;

use crate::id::NodeId;

/// What kind of resource finished loading for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadedResource {
    Texture,
    Text,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    /// A texture or text layout attached to the node became ready.
    Loaded {
        resource: LoadedResource,
        dimensions: (f32, f32),
    },
    /// A resource attached to the node could not be loaded; the node stays
    /// alive and renders nothing for that resource.
    Failed { error: String },
    ParentChanged {
        old_parent: Option<NodeId>,
        new_parent: Option<NodeId>,
    },
    ChildAdded { child: NodeId },
    ChildRemoved { child: NodeId },
    /// The node's world AABB began intersecting the viewport.
    InViewport,
    /// The node's world AABB stopped intersecting the viewport.
    OutOfViewport,
    Destroyed,
}

#[derive(Debug, Default)]
pub(crate) struct EventQueue {
    events: VecDeque<(NodeId, NodeEvent)>,
}

impl EventQueue {
    pub(crate) fn push(&mut self, node: NodeId, event: NodeEvent) {
        self.events.push_back((node, event));
    }

    pub(crate) fn drain(&mut self) -> Vec<(NodeId, NodeEvent)> {
        self.events.drain(..).collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::{EventQueue, NodeEvent};
    use crate::id::NodeId;

    #[test]
    fn drain_preserves_push_order() {
        let mut queue = EventQueue::default();
        queue.push(NodeId(1), NodeEvent::ChildAdded { child: NodeId(2) });
        queue.push(NodeId(2), NodeEvent::Destroyed);

        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].0, NodeId(1));
        assert_eq!(drained[1].1, NodeEvent::Destroyed);
        assert_eq!(queue.len(), 0);
    }
}
