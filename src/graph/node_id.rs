use std::num::NonZero;

/// ID of a node in a [`Model`](crate::Model) graph.
///
/// Each node has a single output value, so the node ID also identifies the
/// value. IDs of staged nodes in a [`GraphEdit`](crate::GraphEdit) follow on
/// from the IDs of the model they edit.
#[derive(Copy, Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NodeId(NonZero<u32>);

impl NodeId {
    /// Return the underlying ID value as a usize, for slice indexing.
    pub fn as_usize(self) -> usize {
        (self.0.get() - 1) as usize
    }

    /// Construct a node ID from an index into a node list.
    ///
    /// Panics if the index exceeds `u32::MAX - 1`.
    pub fn from_usize(index: usize) -> NodeId {
        // IDs are stored offset by one so that `Option<NodeId>` is the same
        // size as `NodeId`.
        let value = u32::try_from(index)
            .ok()
            .and_then(|v| v.checked_add(1))
            .and_then(NonZero::new);
        match value {
            Some(value) => NodeId(value),
            None => panic!("node index {} is too large", index),
        }
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.as_usize().fmt(f)
    }
}

impl std::fmt::Debug for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeId({})", self.as_usize())
    }
}

#[cfg(test)]
mod tests {
    use super::NodeId;

    #[test]
    fn test_node_id() {
        let id = NodeId::from_usize(5);
        assert_eq!(id.as_usize(), 5);
        assert_eq!(id.to_string(), "5");
        assert_eq!(format!("{:?}", id), "NodeId(5)");
        assert_eq!(
            std::mem::size_of::<Option<NodeId>>(),
            std::mem::size_of::<NodeId>()
        );
    }
}
