// Copyright 2022 Oxide Computer Company

//! Per-flow state blocks and the pool they live in.
//!
//! Leaves are owned by a pool, never by the tree. Nodes hold [`LeafId`]
//! handles; a handle carries the generation of the block it was issued for,
//! so a handle kept past the release of its flow resolves to nothing instead
//! of to whichever flow reused the block.

use std::fmt;

use crate::data::FlowNodeData;
use crate::node::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeafId {
    index: u32,
    generation: u32,
}

impl LeafId {
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for LeafId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fcb#{}.{}", self.index, self.generation)
    }
}

/// Flow control block: the state a flow's path ends on.
#[derive(Debug, Clone)]
pub struct FlowControlBlock {
    pub(crate) data: FlowNodeData,
    pub(crate) parent: Option<NodeId>,
    use_count: u32,
    payload: Box<[u8]>,
}

impl FlowControlBlock {
    pub fn new(payload_size: usize) -> Self {
        Self {
            data: FlowNodeData::ZERO,
            parent: None,
            use_count: 0,
            payload: vec![0u8; payload_size].into_boxed_slice(),
        }
    }

    /// Reset to the freshly allocated state. The payload is zeroed so that
    /// nothing of a previous flow is visible to the next one.
    pub fn initialize(&mut self) {
        self.data = FlowNodeData::ZERO;
        self.parent = None;
        self.use_count = 0;
        self.payload.fill(0);
    }

    /// The key under which this leaf sits in its parent.
    pub fn data(&self) -> FlowNodeData {
        self.data
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.payload
    }

    pub fn use_count(&self) -> u32 {
        self.use_count
    }

    pub fn set_use_count(&mut self, n: u32) {
        self.use_count = n;
    }

    pub fn acquire(&mut self, packets: u32) {
        self.use_count = self.use_count.saturating_add(packets);
    }

    /// Drop `packets` references. Returns true once no packet holds the
    /// flow anymore.
    pub fn release(&mut self, packets: u32) -> bool {
        self.use_count = self.use_count.saturating_sub(packets);
        self.use_count == 0
    }
}

/// Allocation contract the classifier relies on. How a pool shares its
/// blocks between threads is its own business.
pub trait LeafPool {
    /// A fresh, initialized block, or `None` when the pool is exhausted.
    fn allocate(&mut self) -> Option<LeafId>;

    fn release(&mut self, leaf: LeafId);

    /// Size of the opaque payload carried by every block.
    fn payload_size(&self) -> usize;

    fn get(&self, leaf: LeafId) -> Option<&FlowControlBlock>;

    fn get_mut(&mut self, leaf: LeafId) -> Option<&mut FlowControlBlock>;

    /// Copy the payload of `from` over the payload of `to`.
    fn copy_payload(&mut self, from: LeafId, to: LeafId) -> bool {
        let bytes = match self.get(from) {
            Some(fcb) => fcb.payload().to_vec(),
            None => return false,
        };
        match self.get_mut(to) {
            Some(fcb) => {
                let n = bytes.len().min(fcb.payload.len());
                fcb.payload[..n].copy_from_slice(&bytes[..n]);
                true
            }
            None => false,
        }
    }

    /// Number of blocks currently handed out.
    fn live(&self) -> usize;
}

struct Slot {
    generation: u32,
    live: bool,
    fcb: FlowControlBlock,
}

/// Slab-backed leaf pool with an optional bound on live blocks.
pub struct FcbPool {
    slots: Vec<Slot>,
    free: Vec<u32>,
    payload_size: usize,
    capacity: Option<usize>,
    live: usize,
}

impl FcbPool {
    pub fn new(payload_size: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            payload_size,
            capacity: None,
            live: 0,
        }
    }

    pub fn with_capacity(payload_size: usize, capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::new(payload_size)
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    fn slot(&self, leaf: LeafId) -> Option<&Slot> {
        self.slots
            .get(leaf.index())
            .filter(|s| s.live && s.generation == leaf.generation)
    }

    fn slot_mut(&mut self, leaf: LeafId) -> Option<&mut Slot> {
        self.slots
            .get_mut(leaf.index())
            .filter(|s| s.live && s.generation == leaf.generation)
    }
}

impl LeafPool for FcbPool {
    fn allocate(&mut self) -> Option<LeafId> {
        if let Some(cap) = self.capacity {
            if self.live >= cap {
                return None;
            }
        }
        let index = match self.free.pop() {
            Some(i) => i,
            None => {
                let i = u32::try_from(self.slots.len()).ok()?;
                self.slots.push(Slot {
                    generation: 0,
                    live: false,
                    fcb: FlowControlBlock::new(self.payload_size),
                });
                i
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.live = true;
        slot.fcb.initialize();
        self.live += 1;
        Some(LeafId::new(index, slot.generation))
    }

    fn release(&mut self, leaf: LeafId) {
        if let Some(slot) = self.slot_mut(leaf) {
            slot.live = false;
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(leaf.index);
            self.live -= 1;
        }
    }

    fn payload_size(&self) -> usize {
        self.payload_size
    }

    fn get(&self, leaf: LeafId) -> Option<&FlowControlBlock> {
        self.slot(leaf).map(|s| &s.fcb)
    }

    fn get_mut(&mut self, leaf: LeafId) -> Option<&mut FlowControlBlock> {
        self.slot_mut(leaf).map(|s| &mut s.fcb)
    }

    fn copy_payload(&mut self, from: LeafId, to: LeafId) -> bool {
        if self.slot(from).is_none() || self.slot(to).is_none() {
            return false;
        }
        let (a, b) = (from.index(), to.index());
        if a == b {
            return true;
        }
        let (src, dst) = if a < b {
            let (lo, hi) = self.slots.split_at_mut(b);
            (&lo[a], &mut hi[0])
        } else {
            let (lo, hi) = self.slots.split_at_mut(a);
            (&hi[0], &mut lo[b])
        };
        dst.fcb.payload.copy_from_slice(&src.fcb.payload);
        true
    }

    fn live(&self) -> usize {
        self.live
    }
}
