// Copyright 2022 Oxide Computer Company

//! Building trees by hand and looking at them.

use std::sync::Arc;

use crate::data::FlowNodeData;
use crate::error::{ConfigurationError, Error, LifecycleError};
use crate::level::FlowLevel;
use crate::node::{FlowNode, NodeId, ThreeCaseChildren, TwoCaseChildren};
use crate::pool::{FlowControlBlock, LeafId, LeafPool};
use crate::ptr::FlowNodePtr;
use crate::table::FlowClassificationTable;

impl<P: LeafPool> FlowClassificationTable<P> {
    /// A detached node classifying on `level`, with the representation its
    /// key space calls for.
    pub fn new_node(&mut self, level: FlowLevel) -> NodeId {
        self.new_node_shared(Arc::new(level))
    }

    /// Like [`Self::new_node`], sharing an existing level.
    pub fn new_node_shared(&mut self, level: Arc<FlowLevel>) -> NodeId {
        self.nodes.insert(FlowNode::new(level))
    }

    /// A node with one explicit key next to its default.
    pub fn new_two_case(&mut self, level: FlowLevel, key: FlowNodeData) -> NodeId {
        let children = Box::new(TwoCaseChildren::new([key]));
        self.nodes
            .insert(FlowNode::with_children(Arc::new(level), children))
    }

    /// A node with two explicit keys next to its default.
    pub fn new_three_case(
        &mut self,
        level: FlowLevel,
        keys: [FlowNodeData; 2],
    ) -> NodeId {
        let children = Box::new(ThreeCaseChildren::new(keys));
        self.nodes
            .insert(FlowNode::with_children(Arc::new(level), children))
    }

    /// A detached leaf whose payload starts with `payload`, zero after it.
    pub fn new_leaf(&mut self, payload: &[u8]) -> Result<LeafId, Error> {
        let payload_size = self.pool.payload_size();
        if payload.len() > payload_size {
            return Err(ConfigurationError::PayloadTooLarge {
                len: payload.len(),
                payload_size,
            }
            .into());
        }
        let leaf = self.pool.allocate().ok_or(Error::PoolExhausted)?;
        let fcb = self
            .pool
            .get_mut(leaf)
            .ok_or(LifecycleError::UnknownLeaf(leaf))?;
        fcb.payload_mut()[..payload.len()].copy_from_slice(payload);
        Ok(leaf)
    }

    /// Insert a detached node under `key`, replacing and freeing whatever
    /// was there.
    pub fn add_node(
        &mut self,
        parent: NodeId,
        key: FlowNodeData,
        child: NodeId,
    ) -> Result<(), Error> {
        self.add_child(parent, key, FlowNodePtr::Node(child))
    }

    /// Insert a detached leaf under `key`, replacing and freeing whatever
    /// was there.
    pub fn add_leaf(
        &mut self,
        parent: NodeId,
        key: FlowNodeData,
        leaf: LeafId,
    ) -> Result<(), Error> {
        self.add_child(parent, key, FlowNodePtr::Leaf(leaf))
    }

    /// Make a detached node or leaf the default path of `parent`.
    pub fn set_default(
        &mut self,
        parent: NodeId,
        ptr: FlowNodePtr,
    ) -> Result<(), Error> {
        self.check_adoptable(parent, ptr)?;
        self.place_default(parent, ptr);
        Ok(())
    }

    fn add_child(
        &mut self,
        parent: NodeId,
        key: FlowNodeData,
        ptr: FlowNodePtr,
    ) -> Result<(), Error> {
        self.check_adoptable(parent, ptr)?;
        let idx = self.claim_slot(parent, key)?;
        self.place(parent, idx, key, ptr);
        Ok(())
    }

    fn check_adoptable(&self, parent: NodeId, ptr: FlowNodePtr) -> Result<(), Error> {
        self.node_ref(parent)?;
        match ptr {
            FlowNodePtr::Node(n) => {
                self.node_ref(n)?;
            }
            FlowNodePtr::Leaf(l) => {
                self.leaf(l).ok_or(LifecycleError::UnknownLeaf(l))?;
            }
        }
        if !self.is_detached(ptr) {
            return Err(ConfigurationError::AlreadyAttached(ptr).into());
        }
        if let FlowNodePtr::Node(n) = ptr {
            if self.top_of(parent) == n {
                return Err(ConfigurationError::CombineIntoSelf {
                    into: parent,
                    other: n,
                }
                .into());
            }
        }
        Ok(())
    }

    /// The topmost ancestor of `id`, `id` itself if it has no parent.
    pub(crate) fn top_of(&self, id: NodeId) -> NodeId {
        let mut cur = id;
        while let Some(p) = self.parent(cur) {
            cur = p;
        }
        cur
    }

    pub fn node(&self, id: NodeId) -> Option<&FlowNode> {
        self.nodes.get(id)
    }

    pub fn level(&self, id: NodeId) -> Option<&FlowLevel> {
        self.nodes.get(id).map(|n| n.level())
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id)?.parent
    }

    pub fn default_of(&self, id: NodeId) -> Option<FlowNodePtr> {
        self.nodes.get(id)?.default
    }

    /// Live explicit children of a node.
    pub fn get_num(&self, id: NodeId) -> Option<usize> {
        self.nodes.get(id).map(|n| n.num)
    }

    pub fn is_released(&self, id: NodeId) -> bool {
        self.nodes.is_released(id)
    }

    /// Live explicit children in representation order.
    pub fn children(
        &self,
        id: NodeId,
    ) -> impl Iterator<Item = (FlowNodeData, FlowNodePtr)> + '_ {
        self.nodes
            .get(id)
            .into_iter()
            .flat_map(|n| n.children.iter())
            .filter(|(_, _, p)| !p.node().is_some_and(|n| self.nodes.is_released(n)))
            .map(|(_, k, p)| (k, p))
    }

    /// What sits in the slot `key` addresses: the explicit child, nothing,
    /// or the default when the representation has no slot for `key`.
    pub fn find(&self, id: NodeId, key: FlowNodeData) -> Option<FlowNodePtr> {
        match self.find_slot(id, key) {
            Some(idx) => self.live_child_at(id, idx, key),
            None => self.default_of(id),
        }
    }

    /// Where a packet with `key` goes next without any duplication.
    pub fn find_or_default(&self, id: NodeId, key: FlowNodeData) -> Option<FlowNodePtr> {
        self.find(id, key).or_else(|| self.default_of(id))
    }

    pub fn leaf(&self, leaf: LeafId) -> Option<&FlowControlBlock> {
        self.pool.get(leaf)
    }

    pub fn leaf_mut(&mut self, leaf: LeafId) -> Option<&mut FlowControlBlock> {
        self.pool.get_mut(leaf)
    }

    pub fn data_of(&self, ptr: FlowNodePtr) -> FlowNodeData {
        ptr.data(&self.nodes, &self.pool)
    }

    pub fn parent_of(&self, ptr: FlowNodePtr) -> Option<NodeId> {
        ptr.parent(&self.nodes, &self.pool)
    }
}
