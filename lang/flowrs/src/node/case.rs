// Copyright 2022 Oxide Computer Company

use crate::data::FlowNodeData;
use crate::node::{ChildTable, NodeId};
use crate::ptr::FlowNodePtr;

/// A handful of fixed keys next to the default path. Keys other than the
/// fixed ones are not addressable and fall through to the default.
///
/// Released and renewed exactly like an array of `N` slots.
#[derive(Debug, Clone)]
pub struct CaseChildren<const N: usize> {
    keys: [FlowNodeData; N],
    slots: [Option<FlowNodePtr>; N],
}

/// One explicit key plus the default.
pub type TwoCaseChildren = CaseChildren<1>;

/// Two explicit keys plus the default.
pub type ThreeCaseChildren = CaseChildren<2>;

impl<const N: usize> CaseChildren<N> {
    pub fn new(keys: [FlowNodeData; N]) -> Self {
        Self {
            keys,
            slots: [None; N],
        }
    }

    pub fn keys(&self) -> &[FlowNodeData; N] {
        &self.keys
    }
}

impl<const N: usize> ChildTable for CaseChildren<N> {
    fn name(&self) -> String {
        match N {
            1 => "TWOCASE".into(),
            2 => "THREECASE".into(),
            n => format!("CASE-{}", n + 1),
        }
    }

    fn find(
        &self,
        key: FlowNodeData,
        _reusable: &dyn Fn(NodeId) -> bool,
    ) -> Option<usize> {
        self.keys.iter().position(|k| k.equals(&key))
    }

    fn get(&self, idx: usize) -> Option<FlowNodePtr> {
        self.slots.get(idx).copied().flatten()
    }

    fn key(&self, idx: usize) -> FlowNodeData {
        self.keys.get(idx).copied().unwrap_or_default()
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
        Box::new(
            self.slots
                .iter()
                .zip(self.keys.iter())
                .enumerate()
                .filter_map(|(i, (s, k))| s.map(|p| (i, *k, p))),
        )
    }

    fn empty_clone(&self) -> Box<dyn ChildTable> {
        Box::new(Self::new(self.keys))
    }

    fn capacity(&self) -> usize {
        N
    }
}
