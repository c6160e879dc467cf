// Copyright 2022 Oxide Computer Company

//! The classification table: a root node, the arena holding every node below
//! it and the pool the flows' leaves come from.
//!
//! Builder, lifecycle, combination and optimisation operations are
//! implemented in their own modules on the same type.

use std::fmt::Write;

use slog::{debug, error, trace, Logger};

use crate::data::FlowNodeData;
use crate::error::{ConfigurationError, Error, LifecycleError};
use crate::node::{ChildTable, DummyChildren, FlowNode, NodeArena, NodeId, SlotRef};
use crate::packet::Packet;
use crate::pool::{FcbPool, FlowControlBlock, LeafId, LeafPool};
use crate::ptr::FlowNodePtr;

/// Called for every leaf right before it goes back to the pool.
pub type ReleaseFn = Box<dyn FnMut(LeafId, &mut FlowControlBlock) + Send>;

pub struct FlowClassificationTable<P: LeafPool = FcbPool> {
    pub(crate) nodes: NodeArena,
    pub(crate) root: Option<NodeId>,
    pub(crate) pool: P,
    pub(crate) release_fnt: Option<ReleaseFn>,
    pub(crate) log: Logger,
}

impl<P: LeafPool> FlowClassificationTable<P> {
    pub fn new(pool: P, log: Logger) -> Self {
        Self {
            nodes: NodeArena::new(),
            root: None,
            pool,
            release_fnt: None,
            log,
        }
    }

    pub fn get_root(&self) -> Option<NodeId> {
        self.root
    }

    /// Make a detached node the root. A previous root and everything below
    /// it is freed.
    pub fn set_root(&mut self, root: NodeId) -> Result<(), Error> {
        let node = self.node_ref(root)?;
        if node.parent.is_some() {
            return Err(ConfigurationError::AlreadyAttached(root.into()).into());
        }
        if let Some(old) = self.root.replace(root) {
            if old != root {
                self.free_subtree(FlowNodePtr::Node(old), true);
            }
        }
        Ok(())
    }

    pub fn set_release_fnt(
        &mut self,
        f: impl FnMut(LeafId, &mut FlowControlBlock) + Send + 'static,
    ) {
        self.release_fnt = Some(Box::new(f));
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut P {
        &mut self.pool
    }

    pub fn log(&self) -> &Logger {
        &self.log
    }

    /// Number of nodes allocated, attached or not.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Classify a packet, creating per-flow state on first sight under
    /// dynamic levels. With `always_dup` every level behaves as dynamic.
    ///
    /// `None` means the packet has no path: some level had neither a child
    /// for its key nor a default, or the pool ran dry while duplicating.
    pub fn match_packet<K: Packet + ?Sized>(
        &mut self,
        packet: &K,
        always_dup: bool,
    ) -> Option<LeafId> {
        let mut cur = self.root?;
        loop {
            let node = self.nodes.get(cur)?;
            let key = node.level.get_data(packet);
            trace!(self.log, "{} {} key={}", cur, node.level, key);
            match self.step(cur, key, always_dup)? {
                FlowNodePtr::Leaf(leaf) => return Some(leaf),
                FlowNodePtr::Node(next) => cur = next,
            }
        }
    }

    fn step(
        &mut self,
        cur: NodeId,
        key: FlowNodeData,
        always_dup: bool,
    ) -> Option<FlowNodePtr> {
        let node = self.nodes.get(cur)?;
        let idx = match self.find_slot(cur, key) {
            Some(idx) => idx,
            None => {
                if node.default.is_none() {
                    debug!(self.log, "{}: no default for {}", cur, key);
                }
                return node.default;
            }
        };
        match node.children.get(idx) {
            Some(FlowNodePtr::Node(n)) if !self.nodes.is_released(n) => {
                return Some(FlowNodePtr::Node(n))
            }
            Some(FlowNodePtr::Leaf(l)) => return Some(FlowNodePtr::Leaf(l)),
            _ => {}
        }

        let Some(default) = node.default else {
            debug!(self.log, "{}: no child and no default for {}", cur, key);
            return None;
        };
        if !(node.level.is_dynamic() || always_dup) {
            return Some(default);
        }
        self.materialize(cur, key, default)
    }

    /// Give `key` its own copy of the default under `cur`.
    fn materialize(
        &mut self,
        cur: NodeId,
        key: FlowNodeData,
        default: FlowNodePtr,
    ) -> Option<FlowNodePtr> {
        match default {
            FlowNodePtr::Leaf(template) => {
                let idx = self.claim_slot(cur, key).ok()?;
                let Some(leaf) = self.pool.allocate() else {
                    debug!(self.log, "{}: leaf pool exhausted", cur);
                    return None;
                };
                self.pool.copy_payload(template, leaf);
                let ptr = FlowNodePtr::Leaf(leaf);
                self.place(cur, idx, key, ptr);
                debug!(self.log, "{}: new flow {} for {}", cur, leaf, key);
                Some(ptr)
            }
            FlowNodePtr::Node(template) => {
                let idx = self.find_slot(cur, key)?;
                if let Some(FlowNodePtr::Node(old)) = self.child_at(cur, idx) {
                    if self.nodes.is_released(old) {
                        return self.renew_in_slot(cur, idx, key, old, template);
                    }
                }
                let idx = self.claim_slot(cur, key).ok()?;
                let Some(copy) = self.copy_subtree(template, false, None) else {
                    debug!(self.log, "{}: leaf pool exhausted", cur);
                    return None;
                };
                let ptr = FlowNodePtr::Node(copy);
                self.place(cur, idx, key, ptr);
                debug!(self.log, "{}: duplicated {} into {} for {}", cur, template, copy, key);
                Some(ptr)
            }
        }
    }

    /// Bring the released node `old` in slot `idx` of `cur` back to life
    /// as a fresh copy of `template`'s content.
    pub(crate) fn renew_in_slot(
        &mut self,
        cur: NodeId,
        idx: usize,
        key: FlowNodeData,
        old: NodeId,
        template: NodeId,
    ) -> Option<FlowNodePtr> {
        self.clear_content(old, true);
        self.nodes.get_mut(old)?.released = false;
        if self.copy_content(template, old, false, None).is_none() {
            // Leave it reusable; whatever was copied is gone again.
            self.clear_content(old, false);
            if let Some(n) = self.nodes.get_mut(old) {
                n.released = true;
            }
            debug!(self.log, "{}: leaf pool exhausted renewing {}", cur, old);
            return None;
        }
        let ptr = FlowNodePtr::Node(old);
        let node = self.nodes.get_mut(cur)?;
        node.children.set(idx, key, ptr);
        node.num += 1;
        ptr.set_parent(&mut self.nodes, &mut self.pool, Some(cur));
        ptr.set_data(&mut self.nodes, &mut self.pool, key);
        debug!(self.log, "{}: renewed {} for {}", cur, old, key);
        Some(ptr)
    }

    /// Whether `packet` would currently be classified to `leaf`.
    pub fn reverse_match<K: Packet + ?Sized>(
        &self,
        leaf: LeafId,
        packet: &K,
    ) -> bool {
        let Some(fcb) = self.pool.get(leaf) else {
            return false;
        };
        let mut child = FlowNodePtr::Leaf(leaf);
        let mut parent = fcb.parent;
        while let Some(p) = parent {
            let Some(node) = self.nodes.get(p) else {
                return false;
            };
            if node.released {
                return false;
            }
            let key = node.level.get_data(packet);
            if node.default == Some(child) {
                if let Some(idx) = self.find_slot(p, key) {
                    // Would hit an explicit child, or get its own copy.
                    if self.live_child_at(p, idx, key).is_some()
                        || node.level.is_dynamic()
                    {
                        return false;
                    }
                }
            } else if self.live_child_at_key(p, key) != Some(child) {
                return false;
            }
            child = FlowNodePtr::Node(p);
            parent = node.parent;
        }
        matches!(child, FlowNodePtr::Node(n) if Some(n) == self.root)
    }

    pub(crate) fn node_ref(&self, id: NodeId) -> Result<&FlowNode, LifecycleError> {
        self.nodes.get(id).ok_or(LifecycleError::UnknownNode(id))
    }

    pub(crate) fn node_mut(
        &mut self,
        id: NodeId,
    ) -> Result<&mut FlowNode, LifecycleError> {
        self.nodes.get_mut(id).ok_or(LifecycleError::UnknownNode(id))
    }

    pub(crate) fn find_slot(&self, id: NodeId, key: FlowNodeData) -> Option<usize> {
        let nodes = &self.nodes;
        nodes
            .get(id)?
            .children
            .find(key, &|n| nodes.is_released(n))
    }

    pub(crate) fn child_at(&self, id: NodeId, idx: usize) -> Option<FlowNodePtr> {
        self.nodes.get(id)?.children.get(idx)
    }

    /// The occupant of `idx` if it is live and filed under `key`.
    pub(crate) fn live_child_at(
        &self,
        id: NodeId,
        idx: usize,
        key: FlowNodeData,
    ) -> Option<FlowNodePtr> {
        let node = self.nodes.get(id)?;
        let ptr = node.children.get(idx)?;
        if !node.children.key(idx).equals(&key) {
            return None;
        }
        match ptr {
            FlowNodePtr::Node(n) if self.nodes.is_released(n) => None,
            _ => Some(ptr),
        }
    }

    pub(crate) fn live_child_at_key(
        &self,
        id: NodeId,
        key: FlowNodeData,
    ) -> Option<FlowNodePtr> {
        let idx = self.find_slot(id, key)?;
        self.live_child_at(id, idx, key)
    }

    /// Where `child` hangs under `parent`.
    pub(crate) fn slot_of(&self, parent: NodeId, child: FlowNodePtr) -> Option<SlotRef> {
        let node = self.nodes.get(parent)?;
        if node.default == Some(child) {
            return Some(SlotRef::Default);
        }
        let key = child.data(&self.nodes, &self.pool);
        if let Some(idx) = self.find_slot(parent, key) {
            if node.children.get(idx) == Some(child) {
                return Some(SlotRef::Child(idx));
            }
        }
        node.children
            .iter()
            .find(|(_, _, p)| *p == child)
            .map(|(idx, _, _)| SlotRef::Child(idx))
    }

    /// Run `f` on a node's child table while the rest of the arena stays
    /// readable.
    pub(crate) fn with_children<R>(
        &mut self,
        id: NodeId,
        f: impl FnOnce(&mut dyn ChildTable, &NodeArena) -> R,
    ) -> Option<R> {
        let node = self.nodes.get_mut(id)?;
        let mut children =
            std::mem::replace(&mut node.children, Box::new(DummyChildren));
        let r = f(children.as_mut(), &self.nodes);
        if let Some(node) = self.nodes.get_mut(id) {
            node.children = children;
        }
        Some(r)
    }

    /// An empty slot for `key` under `id`, ready for [`Self::place`].
    /// Released occupants in the way are freed and the representation is
    /// given the chance to grow.
    pub(crate) fn claim_slot(
        &mut self,
        id: NodeId,
        key: FlowNodeData,
    ) -> Result<usize, Error> {
        let mut idx = self
            .find_slot(id, key)
            .ok_or_else(|| self.unaddressable(id, key))?;
        while let Some(FlowNodePtr::Node(old)) = self.child_at(id, idx) {
            if !self.nodes.is_released(old) {
                break;
            }
            self.with_children(id, |c, _| c.clear(idx));
            self.free_subtree(FlowNodePtr::Node(old), true);
            idx = self
                .find_slot(id, key)
                .ok_or_else(|| self.unaddressable(id, key))?;
        }
        if self.child_at(id, idx).is_some() {
            return Ok(idx);
        }

        let live = self.node_ref(id)?.num;
        let before = self.node_ref(id)?.children.capacity();
        let dropped = self
            .with_children(id, |c, nodes| c.reserve(live, &|n| nodes.is_released(n)))
            .unwrap_or_default();
        for n in dropped {
            self.free_subtree(FlowNodePtr::Node(n), true);
        }
        let after = self.node_ref(id)?.children.capacity();
        if after != before {
            debug!(self.log, "{}: grew from {} to {} slots", id, before, after);
        }
        Ok(self
            .find_slot(id, key)
            .ok_or_else(|| self.unaddressable(id, key))?)
    }

    pub(crate) fn unaddressable(
        &self,
        id: NodeId,
        key: FlowNodeData,
    ) -> ConfigurationError {
        ConfigurationError::UnaddressableKey {
            node: id,
            representation: self
                .nodes
                .get(id)
                .map(|n| n.name())
                .unwrap_or_default(),
            key,
        }
    }

    /// Put `ptr` in slot `idx` of `id` and adopt it. A live previous
    /// occupant is freed.
    pub(crate) fn place(
        &mut self,
        id: NodeId,
        idx: usize,
        key: FlowNodeData,
        ptr: FlowNodePtr,
    ) {
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        let prev = node.children.get(idx);
        node.children.set(idx, key, ptr);
        if prev.is_none() {
            node.num += 1;
        }
        ptr.set_parent(&mut self.nodes, &mut self.pool, Some(id));
        ptr.set_data(&mut self.nodes, &mut self.pool, key);
        if let Some(prev) = prev.filter(|p| *p != ptr) {
            let was_live = match prev {
                FlowNodePtr::Node(n) => !self.nodes.is_released(n),
                FlowNodePtr::Leaf(_) => true,
            };
            if !was_live {
                if let Some(node) = self.nodes.get_mut(id) {
                    node.num += 1;
                }
            }
            self.free_subtree(prev, true);
        }
    }

    /// Put `ptr` on the default path of `id`. A previous default is freed.
    pub(crate) fn place_default(&mut self, id: NodeId, ptr: FlowNodePtr) {
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        let prev = node.default.replace(ptr);
        ptr.set_parent(&mut self.nodes, &mut self.pool, Some(id));
        ptr.set_data(&mut self.nodes, &mut self.pool, FlowNodeData::ZERO);
        if let Some(prev) = prev.filter(|p| *p != ptr) {
            self.free_subtree(prev, true);
        }
    }

    /// Empty a slot and hand back what was in it, still allocated.
    pub(crate) fn take_slot(&mut self, id: NodeId, slot: SlotRef) -> Option<FlowNodePtr> {
        let released = |nodes: &NodeArena, p: FlowNodePtr| {
            p.node().is_some_and(|n| nodes.is_released(n))
        };
        let prev = match slot {
            SlotRef::Default => self.nodes.get_mut(id)?.default.take(),
            SlotRef::Child(idx) => {
                let prev = self.child_at(id, idx)?;
                let live = !released(&self.nodes, prev);
                let node = self.nodes.get_mut(id)?;
                node.children.clear(idx);
                if live {
                    node.num = node.num.saturating_sub(1);
                }
                Some(prev)
            }
        }?;
        prev.set_parent(&mut self.nodes, &mut self.pool, None);
        Some(prev)
    }

    /// Free a node's children and default, keeping the node itself.
    pub(crate) fn clear_content(&mut self, id: NodeId, notify: bool) {
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        let empty = node.children.empty_clone();
        let children = std::mem::replace(&mut node.children, empty);
        let default = node.default.take();
        node.num = 0;
        let doomed: Vec<FlowNodePtr> = children
            .iter()
            .map(|(_, _, p)| p)
            .chain(default)
            .collect();
        for p in doomed {
            self.free_subtree(p, notify);
        }
    }

    /// Free a detached subtree: nodes go back to the arena, leaves to the
    /// pool. With `notify` the release callback sees every leaf first.
    pub(crate) fn free_subtree(&mut self, ptr: FlowNodePtr, notify: bool) {
        let mut stack = vec![ptr];
        while let Some(p) = stack.pop() {
            match p {
                FlowNodePtr::Leaf(leaf) => self.free_leaf(leaf, notify),
                FlowNodePtr::Node(id) => {
                    if self.root == Some(id) {
                        self.root = None;
                    }
                    if let Some(node) = self.nodes.remove(id) {
                        stack.extend(node.children.iter().map(|(_, _, p)| p));
                        stack.extend(node.default);
                    }
                }
            }
        }
    }

    pub(crate) fn free_leaf(&mut self, leaf: LeafId, notify: bool) {
        if notify {
            if let (Some(f), Some(fcb)) =
                (self.release_fnt.as_mut(), self.pool.get_mut(leaf))
            {
                f(leaf, fcb);
            }
        }
        self.pool.release(leaf);
    }

    /// Detached means no parent and not the root.
    pub(crate) fn is_detached(&self, ptr: FlowNodePtr) -> bool {
        match ptr {
            FlowNodePtr::Node(n) => {
                self.root != Some(n)
                    && self.nodes.get(n).is_some_and(|n| n.parent.is_none())
            }
            FlowNodePtr::Leaf(l) => {
                self.pool.get(l).is_some_and(|f| f.parent.is_none())
            }
        }
    }

    /// Indented rendering of the tree below the root.
    pub fn dump(&self) -> String {
        let mut s = String::new();
        match self.root {
            Some(root) => self.dump_node(&mut s, root, 0),
            None => s.push_str("<empty>\n"),
        }
        s
    }

    fn dump_ptr(&self, s: &mut String, ptr: FlowNodePtr, depth: usize) {
        match ptr {
            FlowNodePtr::Node(n) => self.dump_node(s, n, depth),
            FlowNodePtr::Leaf(l) => {
                let uses = self.pool.get(l).map(|f| f.use_count()).unwrap_or(0);
                let _ = writeln!(s, "{:w$}{} uses={}", "", l, uses, w = depth * 2);
            }
        }
    }

    fn dump_node(&self, s: &mut String, id: NodeId, depth: usize) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        let pad = depth * 2;
        let _ = writeln!(
            s,
            "{:w$}{} {} {} num={}{}{}",
            "",
            id,
            node.level,
            node.name(),
            node.num,
            if node.level.is_dynamic() { " dynamic" } else { "" },
            if node.released { " released" } else { "" },
            w = pad,
        );
        for (_, key, child) in node.children.iter() {
            let _ = writeln!(s, "{:w$}{}:", "", key, w = pad + 1);
            self.dump_ptr(s, child, depth + 1);
        }
        if let Some(d) = node.default {
            let _ = writeln!(s, "{:w$}default:", "", w = pad + 1);
            self.dump_ptr(s, d, depth + 1);
        }
    }

    /// Verify the structural invariants of everything reachable from the
    /// root. Problems are logged; returns whether there were none.
    pub fn check(&self) -> bool {
        let Some(root) = self.root else {
            return true;
        };
        let mut ok = true;
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(id) else {
                error!(self.log, "dangling node {}", id);
                ok = false;
                continue;
            };
            let mut live = 0;
            let entries = node.children.iter().map(|(_, k, p)| (Some(k), p));
            for (key, child) in entries.chain(node.default.map(|d| (None, d))) {
                if child.parent(&self.nodes, &self.pool) != Some(id) {
                    error!(self.log, "{}: child {:?} has wrong parent", id, child);
                    ok = false;
                }
                if let Some(key) = key {
                    if child.data(&self.nodes, &self.pool) != key {
                        error!(self.log, "{}: child {:?} not filed under {}", id, child, key);
                        ok = false;
                    }
                }
                match child {
                    FlowNodePtr::Node(n) => {
                        if !self.nodes.contains(n) {
                            error!(self.log, "{}: dangling child {}", id, n);
                            ok = false;
                            continue;
                        }
                        if key.is_some() && !self.nodes.is_released(n) {
                            live += 1;
                        }
                        stack.push(n);
                    }
                    FlowNodePtr::Leaf(l) => {
                        if self.pool.get(l).is_none() {
                            error!(self.log, "{}: stale leaf {}", id, l);
                            ok = false;
                        }
                        if key.is_some() {
                            live += 1;
                        }
                    }
                }
            }
            if live != node.num {
                error!(self.log, "{}: num={} but {} live children", id, node.num, live);
                ok = false;
            }
        }
        ok
    }
}
