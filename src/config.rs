//! Store and registry configuration.
//!
//! Both structs deserialize with `#[serde(default)]`, so an embedding
//! application can load a partial document and only override what it names.

use crate::error::{Error, Result};
use serde::Deserialize;

/// Segment sizing for one `StableStore`.
///
/// Segment `i` holds `first_segment_capacity << i` slots, capped at
/// `max_segment_capacity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub first_segment_capacity: usize,
    pub max_segment_capacity: usize,
}

impl StoreConfig {
    pub const DEFAULT_FIRST_SEGMENT_CAPACITY: usize = 16;
    pub const DEFAULT_MAX_SEGMENT_CAPACITY: usize = 8192;

    pub fn validate(&self) -> Result<()> {
        if self.first_segment_capacity == 0 {
            return Err(Error::InvalidConfig("first_segment_capacity must be non-zero"));
        }
        if self.max_segment_capacity < self.first_segment_capacity {
            return Err(Error::InvalidConfig(
                "max_segment_capacity must not be smaller than first_segment_capacity",
            ));
        }
        // Slot indices inside a segment are kept as u32.
        if self.max_segment_capacity > u32::MAX as usize {
            return Err(Error::InvalidConfig("max_segment_capacity must fit in u32"));
        }
        Ok(())
    }

    /// Number of slots in the segment at `index`.
    pub fn segment_capacity(&self, index: usize) -> usize {
        let shift = index.min(usize::BITS as usize - 1) as u32;
        self.first_segment_capacity
            .saturating_mul(1usize << shift)
            .min(self.max_segment_capacity)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            first_segment_capacity: Self::DEFAULT_FIRST_SEGMENT_CAPACITY,
            max_segment_capacity: Self::DEFAULT_MAX_SEGMENT_CAPACITY,
        }
    }
}

/// One `StoreConfig` per resource kind owned by a `ResourceRegistry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub textures: StoreConfig,
    pub buffers: StoreConfig,
}

impl RegistryConfig {
    pub fn validate(&self) -> Result<()> {
        self.textures.validate()?;
        self.buffers.validate()
    }
}
