// Copyright 2022 Oxide Computer Company

use crate::data::FlowNodeData;
use crate::node::{ChildTable, NodeId};
use crate::ptr::FlowNodePtr;

/// Dense child table indexed directly by key.
#[derive(Debug, Clone)]
pub struct ArrayChildren {
    slots: Vec<Option<FlowNodePtr>>,
}

impl ArrayChildren {
    pub fn new(size: usize) -> Self {
        Self {
            slots: vec![None; size],
        }
    }
}

impl ChildTable for ArrayChildren {
    fn name(&self) -> String {
        format!("ARRAY-{}", self.slots.len())
    }

    fn find(
        &self,
        key: FlowNodeData,
        _reusable: &dyn Fn(NodeId) -> bool,
    ) -> Option<usize> {
        usize::try_from(key.get_long())
            .ok()
            .filter(|i| *i < self.slots.len())
    }

    fn get(&self, idx: usize) -> Option<FlowNodePtr> {
        self.slots.get(idx).copied().flatten()
    }

    fn key(&self, idx: usize) -> FlowNodeData {
        FlowNodeData(idx as u64)
    }

    fn set(&mut self, idx: usize, _key: FlowNodeData, ptr: FlowNodePtr) {
        if let Some(s) = self.slots.get_mut(idx) {
            *s = Some(ptr);
        }
    }

    fn clear(&mut self, idx: usize) {
        if let Some(s) = self.slots.get_mut(idx) {
            *s = None;
        }
    }

    fn iter(
        &self,
    ) -> Box<dyn Iterator<Item = (usize, FlowNodeData, FlowNodePtr)> + '_> {
        Box::new(self.slots.iter().enumerate().filter_map(|(i, s)| {
            s.map(|p| (i, FlowNodeData(i as u64), p))
        }))
    }

    fn empty_clone(&self) -> Box<dyn ChildTable> {
        Box::new(Self::new(self.slots.len()))
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }
}
