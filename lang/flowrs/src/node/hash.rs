// Copyright 2022 Oxide Computer Company

//! Open-addressing child table for key spaces too large for an array.
//!
//! Buckets are probed linearly from the key's home bucket, the top bits of
//! a Fibonacci hash of the key. A cleared bucket becomes
//! a tombstone so that probe chains running through it stay intact; released
//! node occupants are treated like tombstones when another key needs a slot.
//! The table is rebuilt when its occupied and tombstoned buckets pass three
//! fifths of capacity, doubling if the live children alone would not fit.

use crate::data::FlowNodeData;
use crate::node::{ChildTable, NodeId};
use crate::ptr::FlowNodePtr;

pub const INITIAL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bucket {
    Empty,
    Deleted,
    Occupied(FlowNodeData, FlowNodePtr),
}

#[derive(Debug, Clone)]
pub struct HashChildren {
    buckets: Vec<Bucket>,
    /// Buckets that are not `Empty`.
    used: usize,
}

impl Default for HashChildren {
    fn default() -> Self {
        Self::new()
    }
}

const GOLDEN: u64 = 0x9e37_79b9_7f4a_7c15;

/// Home bucket of `key` in a table of `capacity` (a power of two) buckets.
fn home(key: FlowNodeData, capacity: usize) -> usize {
    let bits = capacity.trailing_zeros();
    (key.get_long().wrapping_mul(GOLDEN) >> (64 - bits)) as usize
}

fn max_highwater(capacity: usize) -> usize {
    capacity * 3 / 5
}

impl HashChildren {
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_CAPACITY)
    }

    /// `capacity` is rounded up to a power of two.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buckets: vec![Bucket::Empty; capacity.max(2).next_power_of_two()],
            used: 0,
        }
    }

    fn mask(&self) -> usize {
        self.buckets.len() - 1
    }

    fn rehash(
        &mut self,
        capacity: usize,
        reusable: &dyn Fn(NodeId) -> bool,
    ) -> Vec<NodeId> {
        let old = std::mem::replace(
            &mut self.buckets,
            vec![Bucket::Empty; capacity],
        );
        self.used = 0;
        let mut dropped = Vec::new();
        let cap = self.buckets.len();
        let mask = self.mask();
        for b in old {
            let Bucket::Occupied(key, ptr) = b else {
                continue;
            };
            if let FlowNodePtr::Node(n) = ptr {
                if reusable(n) {
                    dropped.push(n);
                    continue;
                }
            }
            let mut i = home(key, cap);
            while self.buckets[i] != Bucket::Empty {
                i = (i + 1) & mask;
            }
            self.buckets[i] = Bucket::Occupied(key, ptr);
            self.used += 1;
        }
        dropped
    }
}

impl ChildTable for HashChildren {
    fn name(&self) -> String {
        format!("HASH-{}", self.buckets.len())
    }

    fn find(
        &self,
        key: FlowNodeData,
        reusable: &dyn Fn(NodeId) -> bool,
    ) -> Option<usize> {
        let mask = self.mask();
        let mut i = home(key, self.buckets.len());
        let mut reuse = None;
        for _ in 0..self.buckets.len() {
            match self.buckets[i] {
                Bucket::Empty => return Some(reuse.unwrap_or(i)),
                Bucket::Deleted => {
                    reuse.get_or_insert(i);
                }
                Bucket::Occupied(k, ptr) => {
                    if k == key {
                        return Some(i);
                    }
                    if let FlowNodePtr::Node(n) = ptr {
                        if reusable(n) {
                            reuse.get_or_insert(i);
                        }
                    }
                }
            }
            i = (i + 1) & mask;
        }
        reuse
    }

    fn get(&self, idx: usize) -> Option<FlowNodePtr> {
        match self.buckets.get(idx)? {
            Bucket::Occupied(_, ptr) => Some(*ptr),
            _ => None,
        }
    }

    fn key(&self, idx: usize) -> FlowNodeData {
        match self.buckets.get(idx) {
            Some(Bucket::Occupied(k, _)) => *k,
            _ => FlowNodeData::ZERO,
        }
    }

    fn set(&mut self, idx: usize, key: FlowNodeData, ptr: FlowNodePtr) {
        if let Some(b) = self.buckets.get_mut(idx) {
            if *b == Bucket::Empty {
                self.used += 1;
            }
            *b = Bucket::Occupied(key, ptr);
        }
    }

    fn clear(&mut self, idx: usize) {
        if let Some(b) = self.buckets.get_mut(idx) {
            if matches!(b, Bucket::Occupied(..)) {
                *b = Bucket::Deleted;
            }
        }
    }

    fn iter(
        &self,
    ) -> Box<dyn Iterator<Item = (usize, FlowNodeData, FlowNodePtr)> + '_> {
        Box::new(self.buckets.iter().enumerate().filter_map(|(i, b)| {
            match b {
                Bucket::Occupied(k, p) => Some((i, *k, *p)),
                _ => None,
            }
        }))
    }

    fn empty_clone(&self) -> Box<dyn ChildTable> {
        Box::new(Self::with_capacity(self.buckets.len()))
    }

    fn capacity(&self) -> usize {
        self.buckets.len()
    }

    fn reserve(
        &mut self,
        live: usize,
        reusable: &dyn Fn(NodeId) -> bool,
    ) -> Vec<NodeId> {
        let cap = self.buckets.len();
        if self.used < max_highwater(cap) {
            return Vec::new();
        }
        let retained = self
            .iter()
            .filter(|(_, _, p)| !matches!(p, FlowNodePtr::Node(n) if reusable(*n)))
            .count()
            .max(live);
        let mut new_cap = cap;
        while retained + 1 > max_highwater(new_cap) {
            new_cap *= 2;
        }
        self.rehash(new_cap, reusable)
    }
}
