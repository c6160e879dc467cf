// Copyright 2022 Oxide Computer Company

//! Creating, releasing, renewing and copying subtrees.
//!
//! A node released under a deletable level stays in its slot with its
//! content freed and `released` set. The next packet whose key lands on
//! that slot renews it from the parent's default instead of allocating a
//! new node.

use std::sync::Arc;

use slog::debug;

use crate::data::FlowNodeData;
use crate::error::{ConfigurationError, Error, LifecycleError};
use crate::node::{FlowNode, NodeId, SlotRef};
use crate::pool::{LeafId, LeafPool};
use crate::ptr::FlowNodePtr;
use crate::table::FlowClassificationTable;

impl<P: LeafPool> FlowClassificationTable<P> {
    /// Logically empty the slot `child` occupies under `parent`.
    ///
    /// Leaves go back to the pool. Nodes under a deletable level are kept
    /// for reuse and flagged released, anything else is freed. A default
    /// path is always freed.
    pub fn release_child(
        &mut self,
        parent: NodeId,
        child: FlowNodePtr,
    ) -> Result<(), Error> {
        let slot = self
            .slot_of(parent, child)
            .ok_or(LifecycleError::ChildNotFound { parent })?;
        let deletable = self.node_ref(parent)?.level.is_deletable();
        match (slot, child) {
            (SlotRef::Child(_), FlowNodePtr::Node(n)) if deletable => {
                if self.nodes.is_released(n) {
                    return Ok(());
                }
                self.clear_content(n, true);
                self.node_mut(n)?.released = true;
                let p = self.node_mut(parent)?;
                p.num = p.num.saturating_sub(1);
                debug!(self.log, "{}: released {}", parent, n);
            }
            _ => {
                if let Some(p) = self.take_slot(parent, slot) {
                    self.free_subtree(p, true);
                }
            }
        }
        Ok(())
    }

    /// Bring a released node back into use in the slot it was released
    /// from. It is refilled from its parent's default and counts as a live
    /// child again, exactly as when `match` lands on it. With no node on
    /// the parent's default path it comes back empty.
    pub fn renew(&mut self, node: NodeId) -> Result<(), Error> {
        let n = self.node_ref(node)?;
        if !n.released {
            return Err(LifecycleError::NotReleased(node).into());
        }
        let key = n.data;
        let parent = n.parent.ok_or(LifecycleError::UnknownNode(node))?;
        let Some(SlotRef::Child(idx)) = self.slot_of(parent, node.into()) else {
            return Err(LifecycleError::ChildNotFound { parent }.into());
        };
        match self.node_ref(parent)?.default {
            Some(FlowNodePtr::Node(template)) => {
                self.renew_in_slot(parent, idx, key, node, template)
                    .ok_or(Error::PoolExhausted)?;
            }
            _ => {
                self.clear_content(node, true);
                self.node_mut(node)?.released = false;
                self.node_mut(parent)?.num += 1;
                debug!(self.log, "{}: renewed {} empty", parent, node);
            }
        }
        Ok(())
    }

    /// Tear down a flow: release its leaf, then walk up releasing nodes
    /// left without live children, for as long as the parent's level is
    /// both dynamic and deletable.
    ///
    /// A leaf on a default path is shared by every key that falls through
    /// to it and is left alone.
    pub fn release_flow(&mut self, leaf: LeafId) -> Result<(), Error> {
        let fcb = self.pool.get(leaf).ok_or(LifecycleError::UnknownLeaf(leaf))?;
        let Some(parent) = fcb.parent else {
            self.free_leaf(leaf, true);
            return Ok(());
        };
        if self.node_ref(parent)?.default == Some(FlowNodePtr::Leaf(leaf)) {
            return Ok(());
        }
        self.release_child(parent, FlowNodePtr::Leaf(leaf))?;

        let mut cur = parent;
        loop {
            let node = self.node_ref(cur)?;
            if node.num != 0 || node.released {
                break;
            }
            let Some(up) = node.parent else {
                break;
            };
            let upn = self.node_ref(up)?;
            if !(upn.level.is_deletable() && upn.level.is_dynamic())
                || upn.default == Some(FlowNodePtr::Node(cur))
            {
                break;
            }
            self.release_child(up, FlowNodePtr::Node(cur))?;
            cur = up;
        }
        Ok(())
    }

    /// Drop `packets` references to a flow. Returns true when that was the
    /// last of them and the flow has been torn down.
    pub fn release_packets(
        &mut self,
        leaf: LeafId,
        packets: u32,
    ) -> Result<bool, Error> {
        let fcb = self
            .pool
            .get_mut(leaf)
            .ok_or(LifecycleError::UnknownLeaf(leaf))?;
        if !fcb.release(packets) {
            return Ok(false);
        }
        self.release_flow(leaf)?;
        Ok(true)
    }

    /// Copy a node. Recursive copies are complete and independent: levels,
    /// children, default and leaves (payload included, use count set to
    /// `use_count`). A non-recursive copy shares the level and has the same
    /// representation, but no children and no default.
    ///
    /// The copy is detached.
    pub fn duplicate(
        &mut self,
        node: NodeId,
        recursive: bool,
        use_count: u32,
    ) -> Result<NodeId, Error> {
        let src = self.node_ref(node)?;
        if recursive {
            return self
                .copy_subtree(node, true, Some(use_count))
                .ok_or(Error::PoolExhausted);
        }
        let mut copy =
            FlowNode::with_children(src.level.clone(), src.children.empty_clone());
        copy.data = src.data;
        Ok(self.nodes.insert(copy))
    }

    /// Replace a leaf by a node doing finer classification. The end of the
    /// node's default chain takes over the leaf's payload and use count, so
    /// the flow's state carries over to the packets now following the
    /// default path.
    pub fn promote(&mut self, leaf: LeafId, node: NodeId) -> Result<(), Error> {
        let fcb = self.pool.get(leaf).ok_or(LifecycleError::UnknownLeaf(leaf))?;
        let parent = fcb.parent.ok_or(LifecycleError::UnknownLeaf(leaf))?;
        let use_count = fcb.use_count();
        let key = fcb.data;
        if !self.is_detached(FlowNodePtr::Node(node)) {
            return Err(ConfigurationError::AlreadyAttached(node.into()).into());
        }

        let mut cur = node;
        let target = loop {
            match self.node_ref(cur)?.default {
                Some(FlowNodePtr::Node(n)) => cur = n,
                Some(FlowNodePtr::Leaf(l)) => break l,
                None => {
                    let l = self.pool.allocate().ok_or(Error::PoolExhausted)?;
                    self.place_default(cur, FlowNodePtr::Leaf(l));
                    break l;
                }
            }
        };
        self.pool.copy_payload(leaf, target);
        if let Some(f) = self.pool.get_mut(target) {
            f.set_use_count(use_count);
        }

        let slot = self
            .slot_of(parent, FlowNodePtr::Leaf(leaf))
            .ok_or(LifecycleError::ChildNotFound { parent })?;
        self.take_slot(parent, slot);
        match slot {
            SlotRef::Child(idx) => {
                self.place(parent, idx, key, FlowNodePtr::Node(node))
            }
            SlotRef::Default => {
                self.place_default(parent, FlowNodePtr::Node(node))
            }
        }
        self.free_leaf(leaf, false);
        debug!(self.log, "{}: promoted {} to {}", parent, leaf, node);
        Ok(())
    }

    /// Detached copy of the subtree at `src`. Levels are shared unless
    /// `deep_levels`. Leaves get `use_count` when given, zero otherwise.
    /// `None` when the pool runs dry; nothing of the partial copy is left.
    pub(crate) fn copy_subtree(
        &mut self,
        src: NodeId,
        deep_levels: bool,
        use_count: Option<u32>,
    ) -> Option<NodeId> {
        let s = self.nodes.get(src)?;
        let level = if deep_levels {
            Arc::new(s.level.duplicate())
        } else {
            s.level.clone()
        };
        let mut node = FlowNode::with_children(level, s.children.empty_clone());
        node.data = s.data;
        let id = self.nodes.insert(node);
        if self.copy_content(src, id, deep_levels, use_count).is_none() {
            self.free_subtree(FlowNodePtr::Node(id), false);
            return None;
        }
        Some(id)
    }

    /// Copy the live children and default of `src` into the empty node
    /// `dst`. On failure `dst` keeps whatever was copied so far.
    pub(crate) fn copy_content(
        &mut self,
        src: NodeId,
        dst: NodeId,
        deep_levels: bool,
        use_count: Option<u32>,
    ) -> Option<()> {
        let s = self.nodes.get(src)?;
        let entries: Vec<(FlowNodeData, FlowNodePtr)> = s
            .children
            .iter()
            .filter(|(_, _, p)| !p.node().is_some_and(|n| self.nodes.is_released(n)))
            .map(|(_, k, p)| (k, p))
            .collect();
        let default = s.default;

        for (key, ptr) in entries {
            let copy = self.copy_ptr(ptr, deep_levels, use_count)?;
            match self.claim_slot(dst, key) {
                Ok(idx) => self.place(dst, idx, key, copy),
                Err(_) => {
                    self.free_subtree(copy, false);
                    return None;
                }
            }
        }
        if let Some(d) = default {
            let copy = self.copy_ptr(d, deep_levels, use_count)?;
            self.place_default(dst, copy);
        }
        Some(())
    }

    fn copy_ptr(
        &mut self,
        ptr: FlowNodePtr,
        deep_levels: bool,
        use_count: Option<u32>,
    ) -> Option<FlowNodePtr> {
        match ptr {
            FlowNodePtr::Leaf(l) => {
                let data = self.pool.get(l)?.data;
                let copy = self.pool.allocate()?;
                self.pool.copy_payload(l, copy);
                let fcb = self.pool.get_mut(copy)?;
                fcb.data = data;
                fcb.set_use_count(use_count.unwrap_or(0));
                Some(FlowNodePtr::Leaf(copy))
            }
            FlowNodePtr::Node(n) => self
                .copy_subtree(n, deep_levels, use_count)
                .map(FlowNodePtr::Node),
        }
    }

    /// A complete, independent copy of this table drawing its leaves from
    /// `pool`, for a worker that must own its tree outright. The release
    /// callback is not carried over.
    pub fn replicate<Q: LeafPool>(
        &self,
        pool: Q,
    ) -> Result<FlowClassificationTable<Q>, Error> {
        let mut dst = FlowClassificationTable::new(pool, self.log.clone());
        if let Some(root) = self.root {
            let r = self.replicate_node(root, &mut dst)?;
            dst.root = Some(r);
        }
        Ok(dst)
    }

    fn replicate_node<Q: LeafPool>(
        &self,
        src: NodeId,
        dst: &mut FlowClassificationTable<Q>,
    ) -> Result<NodeId, Error> {
        let s = self.node_ref(src)?;
        let mut node = FlowNode::with_children(
            Arc::new(s.level.duplicate()),
            s.children.empty_clone(),
        );
        node.data = s.data;
        let id = dst.nodes.insert(node);

        for (_, key, ptr) in s.children.iter() {
            if ptr.node().is_some_and(|n| self.nodes.is_released(n)) {
                continue;
            }
            let copy = self.replicate_ptr(ptr, dst)?;
            let idx = dst.claim_slot(id, key)?;
            dst.place(id, idx, key, copy);
        }
        if let Some(d) = s.default {
            let copy = self.replicate_ptr(d, dst)?;
            dst.place_default(id, copy);
        }
        Ok(id)
    }

    fn replicate_ptr<Q: LeafPool>(
        &self,
        ptr: FlowNodePtr,
        dst: &mut FlowClassificationTable<Q>,
    ) -> Result<FlowNodePtr, Error> {
        match ptr {
            FlowNodePtr::Node(n) => {
                Ok(FlowNodePtr::Node(self.replicate_node(n, dst)?))
            }
            FlowNodePtr::Leaf(l) => {
                let src = self.pool.get(l).ok_or(LifecycleError::UnknownLeaf(l))?;
                let copy = dst.pool.allocate().ok_or(Error::PoolExhausted)?;
                let fcb = dst
                    .pool
                    .get_mut(copy)
                    .ok_or(LifecycleError::UnknownLeaf(copy))?;
                let n = src.payload().len().min(fcb.payload().len());
                fcb.payload_mut()[..n].copy_from_slice(&src.payload()[..n]);
                fcb.set_use_count(src.use_count());
                fcb.data = src.data;
                Ok(FlowNodePtr::Leaf(copy))
            }
        }
    }
}
