// Copyright 2022 Oxide Computer Company

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::context::current_cpu_id;
use crate::data::FlowNodeData;
use crate::packet::Packet;

/// Width of a packet field read by offset-based levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldWidth {
    W8,
    W16,
    W32,
    W64,
}

impl FieldWidth {
    pub fn bytes(self) -> usize {
        match self {
            Self::W8 => 1,
            Self::W16 => 2,
            Self::W32 => 4,
            Self::W64 => 8,
        }
    }

    pub fn all_ones(self) -> u64 {
        match self {
            Self::W64 => u64::MAX,
            w => (1u64 << (w.bytes() * 8)) - 1,
        }
    }
}

/// What a level extracts its key from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelKind {
    /// Placeholder level. Always yields zero; used on default paths before
    /// trees are combined.
    Dummy,

    /// The id of the core currently running the classifier.
    Thread { nthreads: u32 },

    /// The packet's aggregate annotation, shifted and masked.
    Aggregate { shift: u32, mask: u32 },

    /// A big-endian field at `offset`, masked.
    Generic {
        width: FieldWidth,
        offset: usize,
        mask: u64,
    },

    /// A whole big-endian field at `offset`.
    Field { width: FieldWidth, offset: usize },
}

/// Key extractor for one depth of a classification tree.
///
/// Levels are immutable once a tree is built and are shared by every node
/// of a tree that classifies on them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowLevel {
    kind: LevelKind,

    /// Unseen keys duplicate the default subtree instead of sharing it.
    #[serde(default)]
    dynamic: bool,

    /// Children released under this level are kept for reuse.
    #[serde(default)]
    deletable: bool,
}

impl FlowLevel {
    pub fn new(kind: LevelKind) -> Self {
        Self {
            kind,
            dynamic: false,
            deletable: false,
        }
    }

    pub fn dummy() -> Self {
        Self::new(LevelKind::Dummy)
    }

    pub fn thread(nthreads: u32) -> Self {
        Self::new(LevelKind::Thread { nthreads })
    }

    pub fn aggregate(shift: u32, mask: u32) -> Self {
        Self::new(LevelKind::Aggregate { shift, mask })
    }

    pub fn generic(width: FieldWidth, offset: usize, mask: u64) -> Self {
        Self::new(LevelKind::Generic {
            width,
            offset,
            mask: mask & width.all_ones(),
        })
    }

    pub fn generic8(offset: usize, mask: u8) -> Self {
        Self::generic(FieldWidth::W8, offset, mask.into())
    }

    pub fn generic16(offset: usize, mask: u16) -> Self {
        Self::generic(FieldWidth::W16, offset, mask.into())
    }

    pub fn generic32(offset: usize, mask: u32) -> Self {
        Self::generic(FieldWidth::W32, offset, mask.into())
    }

    pub fn generic64(offset: usize, mask: u64) -> Self {
        Self::generic(FieldWidth::W64, offset, mask)
    }

    pub fn field(width: FieldWidth, offset: usize) -> Self {
        Self::new(LevelKind::Field { width, offset })
    }

    pub fn with_dynamic(mut self) -> Self {
        self.dynamic = true;
        self
    }

    pub fn with_deletable(mut self) -> Self {
        self.deletable = true;
        self
    }

    pub fn kind(&self) -> &LevelKind {
        &self.kind
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    pub fn is_deletable(&self) -> bool {
        self.deletable
    }

    pub fn is_dummy(&self) -> bool {
        matches!(self.kind, LevelKind::Dummy)
    }

    /// Context-keyed levels split a tree into per-core regions.
    pub fn is_mt_safe(&self) -> bool {
        matches!(self.kind, LevelKind::Thread { .. })
    }

    /// A level with an empty mask can only ever produce one key.
    pub fn is_useful(&self) -> bool {
        match self.kind {
            LevelKind::Generic { mask, .. } => mask != 0,
            LevelKind::Aggregate { mask, .. } => mask != 0,
            _ => true,
        }
    }

    /// Largest key this level can produce, inclusive. Drives the choice of
    /// node representation and nothing else.
    pub fn get_max_value(&self) -> u64 {
        match self.kind {
            LevelKind::Dummy => 0,
            LevelKind::Thread { nthreads } => {
                u64::from(nthreads.saturating_sub(1))
            }
            LevelKind::Aggregate { mask, .. } => mask.into(),
            LevelKind::Generic { mask, .. } => mask,
            LevelKind::Field { width, .. } => width.all_ones(),
        }
    }

    pub fn offset(&self) -> Option<usize> {
        match self.kind {
            LevelKind::Generic { offset, .. } | LevelKind::Field { offset, .. } => {
                Some(offset)
            }
            _ => None,
        }
    }

    /// Move an offset-based level further into the packet, used when the
    /// rules were written against an inner header.
    pub fn add_offset(&mut self, n: usize) {
        match &mut self.kind {
            LevelKind::Generic { offset, .. } | LevelKind::Field { offset, .. } => {
                *offset += n
            }
            _ => {}
        }
    }

    pub fn get_data<K: Packet + ?Sized>(&self, packet: &K) -> FlowNodeData {
        match self.kind {
            LevelKind::Dummy => FlowNodeData::ZERO,
            LevelKind::Thread { .. } => current_cpu_id().into(),
            LevelKind::Aggregate { shift, mask } => {
                let agg = packet.aggregate().checked_shr(shift).unwrap_or(0);
                (agg & mask).into()
            }
            LevelKind::Generic {
                width,
                offset,
                mask,
            } => FlowNodeData(read_be(packet.data(), offset, width) & mask),
            LevelKind::Field { width, offset } => {
                FlowNodeData(read_be(packet.data(), offset, width))
            }
        }
    }

    /// Whether two levels classify on the same thing. Runtime flags other
    /// than `dynamic` are not compared.
    pub fn equals(&self, other: &FlowLevel) -> bool {
        self.kind == other.kind && self.dynamic == other.dynamic
    }

    /// Independent copy of the extractor. Never copies any tree.
    pub fn duplicate(&self) -> FlowLevel {
        self.clone()
    }
}

// Bytes past the end of the packet read as zero.
fn read_be(data: &[u8], offset: usize, width: FieldWidth) -> u64 {
    let mut v = 0u64;
    for i in 0..width.bytes() {
        let b = offset
            .checked_add(i)
            .and_then(|o| data.get(o))
            .copied()
            .unwrap_or(0);
        v = (v << 8) | u64::from(b);
    }
    v
}

impl fmt::Display for FlowLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            LevelKind::Dummy => write!(f, "ANY"),
            LevelKind::Thread { .. } => write!(f, "THREAD"),
            LevelKind::Aggregate { .. } => write!(f, "AGG"),
            LevelKind::Generic {
                width,
                offset,
                mask,
            } => write!(
                f,
                "{}/{:0w$X}",
                offset,
                mask,
                w = width.bytes() * 2
            ),
            LevelKind::Field { width, offset } => {
                write!(f, "{}/{}", offset, "FF".repeat(width.bytes()))
            }
        }
    }
}
