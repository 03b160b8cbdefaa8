use std::num::NonZero;

/// ID of a node in a [`Block`](crate::graph::Block).
///
/// IDs are indices into the block's node arena. They are only meaningful
/// within the block that allocated them.
#[derive(Copy, Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NodeId(NonZero<u32>);

impl NodeId {
    /// Return the underlying u32 value of the ID.
    pub fn as_u32(self) -> u32 {
        self.0.get() - 1
    }

    /// Return the underlying ID value as a usize, for slice indexing.
    pub fn as_usize(self) -> usize {
        self.as_u32() as usize
    }

    /// Construct a node ID from a u32 value.
    ///
    /// Panics if the value is `u32::MAX`.
    pub fn from_u32(value: u32) -> NodeId {
        // IDs are stored offset by one so that `Option<NodeId>` is the same
        // size as `NodeId`.
        let stored = value
            .checked_add(1)
            .and_then(NonZero::new)
            .expect("node ID should be less than u32::MAX");
        NodeId(stored)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.as_u32().fmt(f)
    }
}

impl std::fmt::Debug for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeId({})", self.as_u32())
    }
}
