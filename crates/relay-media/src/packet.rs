//! # Media Packet
//!
//! One media unit in flight. A packet is built once by the ingress/demux
//! stage, tagged (keyframe, scalable-video layers) while still uniquely owned,
//! then frozen behind an [`Arc`] and fanned out to any number of sinks
//! without copying the payload.
//!
//! Fields are private: once a packet is shared nothing can change it. A stage
//! that needs a different tagging takes a [`Packet::tagged_copy`], which
//! clones the metadata and shares the payload buffer.
//!
//! ## Layer membership
//!
//! An empty compatibility set means the packet belongs to **no** layer, so
//! `belongs_to_spatial_layer(x)` and `belongs_to_temporal_layer(x)` are false
//! for every `x` until the packet has been tagged.

use bytes::Bytes;
use std::sync::Arc;

use crate::clock;
use crate::error::PacketError;

/// Payload capacity of a single packet (network MTU).
pub const MAX_PACKET_SIZE: usize = 1500;

/// A packet handed between pipeline stages.
pub type SharedPacket = Arc<Packet>;

/// Scalable-video layer identifier (spatial or temporal tier).
pub type LayerId = u8;

/// Kind of media carried by a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    Video,
    Audio,
    Other,
}

impl PacketKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PacketKind::Video => "video",
            PacketKind::Audio => "audio",
            PacketKind::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    component: u32,
    payload: Bytes,
    kind: PacketKind,
    received_at_ms: u64,
    is_keyframe: bool,
    spatial_layers: Vec<LayerId>,
    temporal_layers: Vec<LayerId>,
}

impl Packet {
    /// Copy the first `length` bytes of `data` into a new packet stamped with
    /// the current monotonic time.
    pub fn new(
        component: u32,
        data: &[u8],
        length: usize,
        kind: PacketKind,
    ) -> Result<Self, PacketError> {
        Self::with_timestamp(component, data, length, kind, clock::now_ms())
    }

    /// Like [`Packet::new`] with a caller-supplied arrival time.
    pub fn with_timestamp(
        component: u32,
        data: &[u8],
        length: usize,
        kind: PacketKind,
        received_at_ms: u64,
    ) -> Result<Self, PacketError> {
        if length > MAX_PACKET_SIZE {
            return Err(PacketError::LengthExceeded { length });
        }
        if length > data.len() {
            return Err(PacketError::Truncated {
                length,
                available: data.len(),
            });
        }
        Ok(Self::from_parts(
            component,
            Bytes::copy_from_slice(&data[..length]),
            kind,
            received_at_ms,
        ))
    }

    /// Wrap an already-owned buffer without copying it.
    pub fn from_bytes(component: u32, payload: Bytes, kind: PacketKind) -> Result<Self, PacketError> {
        if payload.len() > MAX_PACKET_SIZE {
            return Err(PacketError::LengthExceeded {
                length: payload.len(),
            });
        }
        Ok(Self::from_parts(component, payload, kind, clock::now_ms()))
    }

    fn from_parts(component: u32, payload: Bytes, kind: PacketKind, received_at_ms: u64) -> Self {
        Packet {
            component,
            payload,
            kind,
            received_at_ms,
            is_keyframe: false,
            spatial_layers: Vec::new(),
            temporal_layers: Vec::new(),
        }
    }

    // ── Tagging (before sharing) ────────────────────────────────────────

    /// Mark the packet as (the start of) a keyframe.
    pub fn with_keyframe(mut self, is_keyframe: bool) -> Self {
        self.is_keyframe = is_keyframe;
        self
    }

    pub fn with_spatial_layers(mut self, layers: impl Into<Vec<LayerId>>) -> Self {
        self.spatial_layers = layers.into();
        self
    }

    pub fn with_temporal_layers(mut self, layers: impl Into<Vec<LayerId>>) -> Self {
        self.temporal_layers = layers.into();
        self
    }

    /// Freeze the packet for fan-out.
    pub fn share(self) -> SharedPacket {
        Arc::new(self)
    }

    /// Metadata copy of a shared packet; the payload buffer is shared, not
    /// duplicated. Use this instead of mutating a packet another stage holds.
    pub fn tagged_copy(&self) -> Packet {
        self.clone()
    }

    // ── Accessors ───────────────────────────────────────────────────────

    pub fn component(&self) -> u32 {
        self.component
    }

    pub fn data(&self) -> &[u8] {
        &self.payload
    }

    /// The payload as a cheaply clonable buffer.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn capacity(&self) -> usize {
        MAX_PACKET_SIZE
    }

    pub fn kind(&self) -> PacketKind {
        self.kind
    }

    pub fn received_at_ms(&self) -> u64 {
        self.received_at_ms
    }

    /// Conservative: may be set only on the first fragment of a keyframe.
    pub fn is_keyframe(&self) -> bool {
        self.is_keyframe
    }

    pub fn compatible_spatial_layers(&self) -> &[LayerId] {
        &self.spatial_layers
    }

    pub fn compatible_temporal_layers(&self) -> &[LayerId] {
        &self.temporal_layers
    }

    pub fn belongs_to_spatial_layer(&self, layer: LayerId) -> bool {
        self.spatial_layers.iter().any(|l| *l == layer)
    }

    pub fn belongs_to_temporal_layer(&self, layer: LayerId) -> bool {
        self.temporal_layers.iter().any(|l| *l == layer)
    }
}
