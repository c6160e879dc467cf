// Copyright 2022 Oxide Computer Company

/// Byte-level view of a packet as seen by the classifier.
///
/// The surrounding pipeline owns packet buffers; the classifier only ever
/// reads them. Anything that can hand out a contiguous byte slice can be
/// classified.
pub trait Packet {
    fn data(&self) -> &[u8];

    /// The aggregate annotation set by upstream elements, if any.
    fn aggregate(&self) -> u32 {
        0
    }
}

impl Packet for [u8] {
    fn data(&self) -> &[u8] {
        self
    }
}

impl<const N: usize> Packet for [u8; N] {
    fn data(&self) -> &[u8] {
        self
    }
}

impl Packet for Vec<u8> {
    fn data(&self) -> &[u8] {
        self
    }
}

/// A borrowed packet carrying an aggregate annotation alongside its bytes.
#[derive(Debug, Clone, Copy)]
pub struct AnnotatedPacket<'a> {
    /// Owned by the pipeline's packet ring.
    pub data: &'a [u8],
    pub aggregate: u32,
}

impl<'a> AnnotatedPacket<'a> {
    pub fn new(data: &'a [u8], aggregate: u32) -> Self {
        Self { data, aggregate }
    }
}

impl Packet for AnnotatedPacket<'_> {
    fn data(&self) -> &[u8] {
        self.data
    }

    fn aggregate(&self) -> u32 {
        self.aggregate
    }
}
