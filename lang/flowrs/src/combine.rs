// Copyright 2022 Oxide Computer Company

//! Merging trees built from separate rule sets.
//!
//! Every combination first runs as a dry run that only checks the merge is
//! possible, so a failed combination leaves both trees untouched.

use slog::info;

use crate::data::FlowNodeData;
use crate::error::{ConfigurationError, Error};
use crate::node::{NodeId, SlotRef};
use crate::pool::LeafPool;
use crate::ptr::FlowNodePtr;
use crate::table::FlowClassificationTable;

impl<P: LeafPool> FlowClassificationTable<P> {
    /// Merge the detached tree `other` into the tree at `node` and return
    /// the node now standing where `node` stood.
    ///
    /// - Same level: children are merged by key. Two nodes under one key
    ///   are combined recursively, otherwise the child from `other` replaces
    ///   the existing one. Defaults merge the same way.
    /// - `other` classifies on nothing: its default is merged into
    ///   `node`'s default.
    /// - `node` classifies on nothing: `other` takes its place, with
    ///   `node`'s default underneath `other`'s default.
    /// - Different levels: `other` is merged onto `node`'s default path.
    pub fn combine(&mut self, node: NodeId, other: NodeId) -> Result<NodeId, Error> {
        self.node_ref(node)?;
        self.node_ref(other)?;
        if !self.is_detached(FlowNodePtr::Node(other)) {
            return Err(ConfigurationError::AlreadyAttached(other.into()).into());
        }
        if self.top_of(node) == other {
            return Err(ConfigurationError::CombineIntoSelf {
                into: node,
                other,
            }
            .into());
        }
        self.combine_nodes(node, other, true)?;
        let result = self.combine_nodes(node, other, false)?;
        info!(self.log, "combined {} into {}", other, node; "result" => %result);
        Ok(result)
    }

    fn combine_nodes(
        &mut self,
        a: NodeId,
        b: NodeId,
        dry: bool,
    ) -> Result<NodeId, Error> {
        let an = self.node_ref(a)?;
        let bn = self.node_ref(b)?;
        let (a_default, b_default) = (an.default, bn.default);

        if an.level.equals(&bn.level) {
            let entries: Vec<(FlowNodeData, FlowNodePtr)> = self.children(b).collect();
            for (key, ptr) in entries {
                self.merge_child(a, key, ptr, dry)?;
            }
            if let Some(d) = b_default {
                self.merge_default(a, d, dry)?;
            }
            if !dry {
                self.discard_shell(b);
            }
            Ok(a)
        } else if bn.level.is_dummy() {
            if let Some(d) = b_default {
                self.merge_default(a, d, dry)?;
            }
            if !dry {
                self.discard_shell(b);
            }
            Ok(a)
        } else if an.level.is_dummy() {
            if let Some(base) = a_default {
                self.merge_base(b, base, dry)?;
            }
            if !dry {
                self.replace_in_parent(a, b);
                self.free_subtree(FlowNodePtr::Node(a), true);
            }
            Ok(b)
        } else {
            match a_default {
                Some(FlowNodePtr::Node(d)) => {
                    self.combine_nodes(d, b, dry)?;
                }
                _ => {
                    if !dry {
                        self.place_default(a, FlowNodePtr::Node(b));
                    }
                }
            }
            Ok(a)
        }
    }

    fn merge_child(
        &mut self,
        a: NodeId,
        key: FlowNodeData,
        incoming: FlowNodePtr,
        dry: bool,
    ) -> Result<(), Error> {
        let idx = self
            .find_slot(a, key)
            .ok_or_else(|| self.unaddressable(a, key))?;
        match (self.live_child_at(a, idx, key), incoming) {
            (Some(FlowNodePtr::Node(x)), FlowNodePtr::Node(y)) => {
                self.combine_nodes(x, y, dry)?;
            }
            _ => {
                if !dry {
                    let idx = self.claim_slot(a, key)?;
                    self.place(a, idx, key, incoming);
                }
            }
        }
        Ok(())
    }

    fn merge_default(
        &mut self,
        a: NodeId,
        incoming: FlowNodePtr,
        dry: bool,
    ) -> Result<(), Error> {
        match (self.node_ref(a)?.default, incoming) {
            (Some(FlowNodePtr::Node(x)), FlowNodePtr::Node(y)) => {
                self.combine_nodes(x, y, dry)?;
            }
            _ => {
                if !dry {
                    self.place_default(a, incoming);
                }
            }
        }
        Ok(())
    }

    /// Put `base` underneath the default of `b`; what `b` already has on its
    /// default path takes precedence.
    fn merge_base(
        &mut self,
        b: NodeId,
        base: FlowNodePtr,
        dry: bool,
    ) -> Result<(), Error> {
        match (self.node_ref(b)?.default, base) {
            (None, _) => {
                if !dry {
                    self.take_base(base);
                    self.place_default(b, base);
                }
            }
            (Some(FlowNodePtr::Node(over)), FlowNodePtr::Node(under)) => {
                if dry {
                    self.combine_nodes(under, over, true)?;
                } else {
                    self.take_slot(b, SlotRef::Default);
                    self.take_base(base);
                    self.place_default(b, base);
                    self.combine_nodes(under, over, false)?;
                }
            }
            // b's own default wins; base goes with the discarded node
            _ => {}
        }
        Ok(())
    }

    fn take_base(&mut self, base: FlowNodePtr) {
        if let Some(parent) = self.parent_of(base) {
            self.take_slot(parent, SlotRef::Default);
        }
    }

    /// Put `new` in the slot `old` occupies, `old` ends up detached.
    fn replace_in_parent(&mut self, old: NodeId, new: NodeId) {
        let Some(node) = self.nodes.get_mut(old) else {
            return;
        };
        let (parent, data) = (node.parent.take(), node.data);
        let new_ptr = FlowNodePtr::Node(new);
        match parent {
            None => {
                if self.root == Some(old) {
                    self.root = Some(new);
                }
            }
            Some(p) => match self.slot_of(p, FlowNodePtr::Node(old)) {
                Some(SlotRef::Default) => {
                    if let Some(pn) = self.nodes.get_mut(p) {
                        pn.default = Some(new_ptr);
                    }
                }
                Some(SlotRef::Child(idx)) => {
                    if let Some(pn) = self.nodes.get_mut(p) {
                        pn.children.set(idx, data, new_ptr);
                    }
                }
                None => {}
            },
        }
        new_ptr.set_parent(&mut self.nodes, &mut self.pool, parent);
        new_ptr.set_data(&mut self.nodes, &mut self.pool, data);
    }

    /// Drop a node whose live children and default were moved elsewhere.
    fn discard_shell(&mut self, id: NodeId) {
        let released: Vec<NodeId> = self
            .nodes
            .get(id)
            .map(|n| {
                n.children
                    .iter()
                    .filter_map(|(_, _, p)| p.node())
                    .filter(|c| self.nodes.is_released(*c))
                    .collect()
            })
            .unwrap_or_default();
        for n in released {
            self.free_subtree(FlowNodePtr::Node(n), true);
        }
        self.nodes.remove(id);
    }
}
