// Copyright 2022 Oxide Computer Company

use std::fmt;

use crate::data::FlowNodeData;
use crate::node::{NodeArena, NodeId};
use crate::pool::{LeafId, LeafPool};

/// Occupant of a tree slot: an inner node or a leaf.
///
/// The variant is fixed for a given occupant, but what occupies a slot may
/// change over time, including a leaf being promoted to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowNodePtr {
    Node(NodeId),
    Leaf(LeafId),
}

impl FlowNodePtr {
    pub fn is_leaf(&self) -> bool {
        matches!(self, Self::Leaf(_))
    }

    pub fn is_node(&self) -> bool {
        matches!(self, Self::Node(_))
    }

    pub fn node(&self) -> Option<NodeId> {
        match self {
            Self::Node(n) => Some(*n),
            Self::Leaf(_) => None,
        }
    }

    pub fn leaf(&self) -> Option<LeafId> {
        match self {
            Self::Leaf(l) => Some(*l),
            Self::Node(_) => None,
        }
    }

    /// The key this occupant is filed under in its parent. Dangling handles
    /// read as zero.
    pub fn data<P: LeafPool + ?Sized>(
        &self,
        nodes: &NodeArena,
        pool: &P,
    ) -> FlowNodeData {
        match self {
            Self::Node(n) => nodes.get(*n).map(|n| n.data).unwrap_or_default(),
            Self::Leaf(l) => pool.get(*l).map(|f| f.data).unwrap_or_default(),
        }
    }

    pub fn parent<P: LeafPool + ?Sized>(
        &self,
        nodes: &NodeArena,
        pool: &P,
    ) -> Option<NodeId> {
        match self {
            Self::Node(n) => nodes.get(*n)?.parent,
            Self::Leaf(l) => pool.get(*l)?.parent,
        }
    }

    pub fn set_data<P: LeafPool + ?Sized>(
        &self,
        nodes: &mut NodeArena,
        pool: &mut P,
        data: FlowNodeData,
    ) {
        match self {
            Self::Node(n) => {
                if let Some(n) = nodes.get_mut(*n) {
                    n.data = data;
                }
            }
            Self::Leaf(l) => {
                if let Some(f) = pool.get_mut(*l) {
                    f.data = data;
                }
            }
        }
    }

    pub fn set_parent<P: LeafPool + ?Sized>(
        &self,
        nodes: &mut NodeArena,
        pool: &mut P,
        parent: Option<NodeId>,
    ) {
        match self {
            Self::Node(n) => {
                if let Some(n) = nodes.get_mut(*n) {
                    n.parent = parent;
                }
            }
            Self::Leaf(l) => {
                if let Some(f) = pool.get_mut(*l) {
                    f.parent = parent;
                }
            }
        }
    }
}

impl fmt::Display for FlowNodePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node(n) => n.fmt(f),
            Self::Leaf(l) => l.fmt(f),
        }
    }
}

impl From<NodeId> for FlowNodePtr {
    fn from(n: NodeId) -> Self {
        Self::Node(n)
    }
}

impl From<LeafId> for FlowNodePtr {
    fn from(l: LeafId) -> Self {
        Self::Leaf(l)
    }
}
