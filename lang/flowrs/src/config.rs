// Copyright 2022 Oxide Computer Company

//! Declarative table setup.
//!
//! A configuration names the levels a table classifies on, outermost first,
//! and the payload new flows start with:
//!
//! ```json
//! {
//!   "payload_size": 16,
//!   "levels": [
//!     { "kind": { "generic": { "width": "w8", "offset": 9, "mask": 255 } } },
//!     { "kind": { "field": { "width": "w32", "offset": 12 } }, "dynamic": true }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};
use slog::Logger;

use crate::error::{ConfigurationError, Error};
use crate::level::FlowLevel;
use crate::node::NodeId;
use crate::pool::{FcbPool, LeafPool};
use crate::ptr::FlowNodePtr;
use crate::table::FlowClassificationTable;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConfig {
    /// Bytes of opaque per-flow state in every leaf.
    pub payload_size: usize,

    /// Upper bound on live leaves, unbounded when absent.
    #[serde(default)]
    pub pool_capacity: Option<usize>,

    pub levels: Vec<FlowLevel>,

    /// What the payload of a new flow starts as; zero padded.
    #[serde(default)]
    pub leaf_payload: Vec<u8>,
}

impl TableConfig {
    pub fn from_json(s: &str) -> Result<Self, ConfigurationError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn to_json(&self) -> Result<String, ConfigurationError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn pool(&self) -> FcbPool {
        match self.pool_capacity {
            Some(cap) => FcbPool::with_capacity(self.payload_size, cap),
            None => FcbPool::new(self.payload_size),
        }
    }
}

impl FlowClassificationTable<FcbPool> {
    pub fn from_config(config: &TableConfig, log: Logger) -> Result<Self, Error> {
        let mut t = Self::new(config.pool(), log);
        let root = t.build_chain(&config.levels, &config.leaf_payload)?;
        t.set_root(root)?;
        Ok(t)
    }
}

impl<P: LeafPool> FlowClassificationTable<P> {
    /// One detached node per level, each on the default path of the one
    /// before, the last default being a leaf carrying `payload`. Without
    /// levels the chain is a single node classifying on nothing.
    pub fn build_chain(
        &mut self,
        levels: &[FlowLevel],
        payload: &[u8],
    ) -> Result<NodeId, Error> {
        let leaf = self.new_leaf(payload)?;
        let mut below = FlowNodePtr::Leaf(leaf);
        let dummy = [FlowLevel::dummy()];
        let levels = if levels.is_empty() { &dummy[..] } else { levels };
        for level in levels.iter().rev() {
            let n = self.new_node(level.clone());
            self.set_default(n, below)?;
            below = FlowNodePtr::Node(n);
        }
        below
            .node()
            .ok_or_else(|| ConfigurationError::NoRoot.into())
    }
}
