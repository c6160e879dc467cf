// Copyright 2022 Oxide Computer Company

use crate::data::FlowNodeData;
use crate::node::{ChildTable, NodeId};
use crate::ptr::FlowNodePtr;

/// No explicit children at all; every key follows the default path.
#[derive(Debug, Clone, Copy, Default)]
pub struct DummyChildren;

impl ChildTable for DummyChildren {
    fn name(&self) -> String {
        "DUMMY".into()
    }

    fn find(
        &self,
        _key: FlowNodeData,
        _reusable: &dyn Fn(NodeId) -> bool,
    ) -> Option<usize> {
        None
    }

    fn get(&self, _idx: usize) -> Option<FlowNodePtr> {
        None
    }

    fn key(&self, _idx: usize) -> FlowNodeData {
        FlowNodeData::ZERO
    }

    fn set(&mut self, _idx: usize, _key: FlowNodeData, _ptr: FlowNodePtr) {}

    fn clear(&mut self, _idx: usize) {}

    fn iter(
        &self,
    ) -> Box<dyn Iterator<Item = (usize, FlowNodeData, FlowNodePtr)> + '_> {
        Box::new(std::iter::empty())
    }

    fn empty_clone(&self) -> Box<dyn ChildTable> {
        Box::new(Self)
    }

    fn capacity(&self) -> usize {
        0
    }
}
