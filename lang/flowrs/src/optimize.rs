// Copyright 2022 Oxide Computer Company

use slog::info;

use crate::data::FlowNodeData;
use crate::error::Error;
use crate::node::{
    ChildTable, DummyChildren, NodeId, SlotRef, ThreeCaseChildren, TwoCaseChildren,
};
use crate::pool::LeafPool;
use crate::ptr::FlowNodePtr;
use crate::table::FlowClassificationTable;

impl<P: LeafPool> FlowClassificationTable<P> {
    /// Compact the whole tree once it is fully built. See
    /// [`Self::optimize_node`].
    pub fn optimize(&mut self) -> Result<(), Error> {
        match self.root {
            Some(root) => self.optimize_node(root),
            None => Ok(()),
        }
    }

    /// Swap the child tables of static nodes with few children for a
    /// cheaper representation: none becomes DUMMY, one TWOCASE, two
    /// THREECASE. Lookups for any key give the same result as before; only
    /// the set of keys that can be added later shrinks. Dynamic levels are
    /// left alone. Released nodes found on the way are freed.
    pub fn optimize_node(&mut self, id: NodeId) -> Result<(), Error> {
        let node = self.node_ref(id)?;
        let released: Vec<usize> = node
            .children
            .iter()
            .filter(|(_, _, p)| p.node().is_some_and(|n| self.nodes.is_released(n)))
            .map(|(idx, _, _)| idx)
            .collect();
        for idx in released {
            if let Some(p) = self.take_slot(id, SlotRef::Child(idx)) {
                self.free_subtree(p, true);
            }
        }

        let node = self.node_ref(id)?;
        let below: Vec<NodeId> = node
            .children
            .iter()
            .map(|(_, _, p)| p)
            .chain(node.default)
            .filter_map(|p| p.node())
            .collect();
        for n in below {
            self.optimize_node(n)?;
        }

        let node = self.node_ref(id)?;
        if node.level.is_dynamic() {
            return Ok(());
        }
        let entries: Vec<(FlowNodeData, FlowNodePtr)> =
            node.children.iter().map(|(_, k, p)| (k, p)).collect();
        let mut compact: Box<dyn ChildTable> = match entries.as_slice() {
            [] => Box::new(DummyChildren),
            [(k, _)] => Box::new(TwoCaseChildren::new([*k])),
            [(k0, _), (k1, _)] => Box::new(ThreeCaseChildren::new([*k0, *k1])),
            _ => return Ok(()),
        };
        for (i, (k, p)) in entries.into_iter().enumerate() {
            compact.set(i, k, p);
        }
        let before = node.name();
        let node = self.node_mut(id)?;
        node.children = compact;
        let after = node.name();
        if before != after {
            info!(self.log, "optimized {}: {} -> {}", id, before, after);
        }
        Ok(())
    }
}
