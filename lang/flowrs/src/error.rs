// Copyright 2022 Oxide Computer Company

use thiserror::Error;

use crate::data::FlowNodeData;
use crate::node::NodeId;
use crate::pool::LeafId;
use crate::ptr::FlowNodePtr;

/// A tree cannot be built or composed the way it was asked to be.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    /// The node's representation has no slot for this key.
    #[error("key {key} is not addressable by {node} ({representation})")]
    UnaddressableKey {
        node: NodeId,
        representation: String,
        key: FlowNodeData,
    },

    /// Only detached nodes can be inserted, combined in or made root.
    #[error("{0} already has a parent")]
    AlreadyAttached(FlowNodePtr),

    /// A tree cannot be combined into itself or into one of its descendants.
    #[error("cannot combine {other} into its own subtree {into}")]
    CombineIntoSelf { into: NodeId, other: NodeId },

    #[error("payload of {len} bytes exceeds pool payload size {payload_size}")]
    PayloadTooLarge { len: usize, payload_size: usize },

    #[error("table has no root")]
    NoRoot,

    /// A configuration document could not be read.
    #[error("configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// A handle passed to a lifecycle operation does not name what it claims.
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    #[error("unknown leaf {0}")]
    UnknownLeaf(LeafId),

    #[error("child not found under {parent}")]
    ChildNotFound { parent: NodeId },

    /// Only a released node can be renewed.
    #[error("{0} is not released")]
    NotReleased(NodeId),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("leaf pool exhausted")]
    PoolExhausted,
}
