// Copyright 2022 Oxide Computer Company

//! Tree nodes and their interchangeable child-table representations.
//!
//! Nodes live in a [`NodeArena`] and refer to each other through [`NodeId`]
//! indices. Every node and every leaf has exactly one parent slot, which is
//! what makes duplication and release straightforward: freeing a slot's
//! occupant frees precisely the subtree below it.

use std::fmt;
use std::sync::Arc;

use crate::data::FlowNodeData;
use crate::level::FlowLevel;
use crate::ptr::FlowNodePtr;

pub mod array;
pub mod case;
pub mod dummy;
pub mod hash;

pub use array::ArrayChildren;
pub use case::{CaseChildren, ThreeCaseChildren, TwoCaseChildren};
pub use dummy::DummyChildren;
pub use hash::HashChildren;

/// Largest key space still served by a dense array.
pub const ARRAY_MAX_VALUE: u64 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Where a key lands inside a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotRef {
    /// An explicit slot of the child table, possibly empty.
    Child(usize),
    /// The default path.
    Default,
}

/// Map from key to child slot. One implementation per representation; which
/// one a node gets is decided by its level's key space.
pub trait ChildTable: fmt::Debug + Send + Sync {
    fn name(&self) -> String;

    /// Slot for `key`, or `None` when the key can only go down the default
    /// path. `reusable` tells probing representations which node occupants
    /// have been released and may be taken over by another key.
    fn find(
        &self,
        key: FlowNodeData,
        reusable: &dyn Fn(NodeId) -> bool,
    ) -> Option<usize>;

    fn get(&self, idx: usize) -> Option<FlowNodePtr>;

    /// The key an explicit slot answers to.
    fn key(&self, idx: usize) -> FlowNodeData;

    fn set(&mut self, idx: usize, key: FlowNodeData, ptr: FlowNodePtr);

    /// Logically empty a slot.
    fn clear(&mut self, idx: usize);

    /// Occupied slots in representation order.
    fn iter(&self) -> Box<dyn Iterator<Item = (usize, FlowNodeData, FlowNodePtr)> + '_>;

    /// Same representation and shape, no children.
    fn empty_clone(&self) -> Box<dyn ChildTable>;

    fn capacity(&self) -> usize;

    /// Make room for one more live child. Representations that rebuild
    /// themselves return the released node occupants they dropped so the
    /// caller can free them.
    fn reserve(
        &mut self,
        _live: usize,
        _reusable: &dyn Fn(NodeId) -> bool,
    ) -> Vec<NodeId> {
        Vec::new()
    }
}

/// Pick the representation for a level's key space.
pub fn children_for(level: &FlowLevel) -> Box<dyn ChildTable> {
    let max = level.get_max_value();
    if max == 0 {
        Box::new(DummyChildren)
    } else if max <= ARRAY_MAX_VALUE {
        Box::new(ArrayChildren::new(max as usize + 1))
    } else {
        Box::new(HashChildren::new())
    }
}

#[derive(Debug)]
pub struct FlowNode {
    pub(crate) level: Arc<FlowLevel>,
    pub(crate) parent: Option<NodeId>,
    /// Key under which this node sits in its parent.
    pub(crate) data: FlowNodeData,
    pub(crate) default: Option<FlowNodePtr>,
    /// Live explicit children. Released nodes do not count.
    pub(crate) num: usize,
    pub(crate) released: bool,
    pub(crate) children: Box<dyn ChildTable>,
}

impl FlowNode {
    pub fn new(level: Arc<FlowLevel>) -> Self {
        let children = children_for(&level);
        Self::with_children(level, children)
    }

    pub fn with_children(
        level: Arc<FlowLevel>,
        children: Box<dyn ChildTable>,
    ) -> Self {
        Self {
            level,
            parent: None,
            data: FlowNodeData::ZERO,
            default: None,
            num: 0,
            released: false,
            children,
        }
    }

    pub fn level(&self) -> &FlowLevel {
        &self.level
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn data(&self) -> FlowNodeData {
        self.data
    }

    pub fn default_ptr(&self) -> Option<FlowNodePtr> {
        self.default
    }

    pub fn get_num(&self) -> usize {
        self.num
    }

    pub fn released(&self) -> bool {
        self.released
    }

    pub fn name(&self) -> String {
        self.children.name()
    }
}

/// Slab of nodes addressed by [`NodeId`].
#[derive(Debug, Default)]
pub struct NodeArena {
    slots: Vec<Option<FlowNode>>,
    free: Vec<u32>,
}

impl NodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: FlowNode) -> NodeId {
        match self.free.pop() {
            Some(i) => {
                self.slots[i as usize] = Some(node);
                NodeId(i)
            }
            None => {
                self.slots.push(Some(node));
                NodeId((self.slots.len() - 1) as u32)
            }
        }
    }

    pub fn remove(&mut self, id: NodeId) -> Option<FlowNode> {
        let node = self.slots.get_mut(id.index())?.take()?;
        self.free.push(id.0);
        Some(node)
    }

    pub fn get(&self, id: NodeId) -> Option<&FlowNode> {
        self.slots.get(id.index())?.as_ref()
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut FlowNode> {
        self.slots.get_mut(id.index())?.as_mut()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    pub fn is_released(&self, id: NodeId) -> bool {
        self.get(id).is_some_and(|n| n.released)
    }

    /// Number of nodes currently allocated.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
