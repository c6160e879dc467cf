// Copyright 2022 Oxide Computer Company

//! Per-packet flow classification.
//!
//! A [`FlowClassificationTable`] is a tree of [`FlowNode`]s. Every depth
//! classifies on one [`FlowLevel`]: a packet field, the current core or an
//! annotation. Following a packet's keys from the root leads to a leaf, the
//! [`FlowControlBlock`] holding the state of the packet's flow. Keys seen
//! for the first time under a dynamic level get their own copy of the
//! level's default subtree, so new flows get fresh state on first sight.
//!
//! ```
//! use flowrs::logging::stderr_logger;
//! use flowrs::{FlowClassificationTable, FlowLevel, TableConfig};
//!
//! // one flow per IPv4 protocol number
//! let config = TableConfig {
//!     payload_size: 4,
//!     pool_capacity: None,
//!     levels: vec![FlowLevel::generic8(9, 0xff).with_dynamic()],
//!     leaf_payload: vec![1],
//! };
//! let mut table = FlowClassificationTable::from_config(&config, stderr_logger())?;
//!
//! let mut tcp = [0u8; 20];
//! tcp[9] = 6;
//! let mut udp = tcp;
//! udp[9] = 17;
//! let flow = table.match_packet(&tcp, false).unwrap();
//! assert_eq!(table.match_packet(&tcp, false), Some(flow));
//! assert_ne!(table.match_packet(&udp, false), Some(flow));
//! assert_eq!(table.leaf(flow).unwrap().payload(), &[1, 0, 0, 0]);
//! # Ok::<(), flowrs::Error>(())
//! ```

pub mod build;
pub mod combine;
pub mod config;
pub mod context;
pub mod data;
pub mod error;
pub mod level;
pub mod lifecycle;
pub mod logging;
pub mod node;
pub mod optimize;
pub mod packet;
pub mod pool;
pub mod ptr;
pub mod table;

pub use config::TableConfig;
pub use data::FlowNodeData;
pub use error::{ConfigurationError, Error, LifecycleError};
pub use level::{FieldWidth, FlowLevel, LevelKind};
pub use node::{FlowNode, NodeId};
pub use packet::{AnnotatedPacket, Packet};
pub use pool::{FcbPool, FlowControlBlock, LeafId, LeafPool};
pub use ptr::FlowNodePtr;
pub use table::FlowClassificationTable;
