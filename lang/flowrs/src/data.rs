// Copyright 2022 Oxide Computer Company

use std::fmt;

use serde::{Deserialize, Serialize};

/// The key a [`crate::level::FlowLevel`] extracts from a packet.
///
/// Levels produce 8, 16, 32 or 64 bit values; all of them are widened into
/// the same 64-bit container so that comparison is always a full compare.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
pub struct FlowNodeData(pub u64);

impl FlowNodeData {
    pub const ZERO: Self = Self(0);

    pub fn get_long(&self) -> u64 {
        self.0
    }

    pub fn data_8(&self) -> u8 {
        self.0 as u8
    }

    pub fn data_16(&self) -> u16 {
        self.0 as u16
    }

    pub fn data_32(&self) -> u32 {
        self.0 as u32
    }

    pub fn equals(&self, other: &FlowNodeData) -> bool {
        self.0 == other.0
    }
}

impl From<u8> for FlowNodeData {
    fn from(x: u8) -> Self {
        Self(x.into())
    }
}

impl From<u16> for FlowNodeData {
    fn from(x: u16) -> Self {
        Self(x.into())
    }
}

impl From<u32> for FlowNodeData {
    fn from(x: u32) -> Self {
        Self(x.into())
    }
}

impl From<u64> for FlowNodeData {
    fn from(x: u64) -> Self {
        Self(x)
    }
}

impl From<std::net::Ipv4Addr> for FlowNodeData {
    fn from(x: std::net::Ipv4Addr) -> Self {
        Self(u32::from(x).into())
    }
}

impl fmt::Display for FlowNodeData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
