//! Texture resource.

use crate::registry::ResourceRegistry;
use crate::resource::{Resource, ResourceDescriptor, ResourceHeader, ResourceKind};
use crate::stable_store::StableStore;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Bgra8Unorm,
    Rgba16Float,
    Depth32Float,
}

impl TextureFormat {
    pub fn bytes_per_texel(self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm | TextureFormat::Bgra8Unorm => 4,
            TextureFormat::Rgba16Float => 8,
            TextureFormat::Depth32Float => 4,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Extent3d {
    pub width: u32,
    pub height: u32,
    pub depth_or_array_layers: u32,
}

impl Default for Extent3d {
    fn default() -> Self {
        Self {
            width: 1,
            height: 1,
            depth_or_array_layers: 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    pub size: Extent3d,
    pub mip_level_count: u32,
    pub format: TextureFormat,
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            size: Extent3d::default(),
            mip_level_count: 1,
            format: TextureFormat::Rgba8Unorm,
        }
    }
}

impl ResourceDescriptor for TextureDescriptor {
    fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

#[derive(Debug)]
pub struct Texture {
    header: ResourceHeader,
    size: Extent3d,
    mip_level_count: u32,
    format: TextureFormat,
}

impl Texture {
    pub fn size(&self) -> Extent3d {
        self.size
    }

    pub fn mip_level_count(&self) -> u32 {
        self.mip_level_count
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    /// Bytes of the base mip level, or `None` if that overflows `u64`.
    pub fn base_level_bytes(&self) -> Option<u64> {
        u64::from(self.size.width)
            .checked_mul(u64::from(self.size.height))?
            .checked_mul(u64::from(self.size.depth_or_array_layers))?
            .checked_mul(u64::from(self.format.bytes_per_texel()))
    }
}

impl Resource for Texture {
    type Descriptor = TextureDescriptor;

    const KIND: ResourceKind = ResourceKind::Texture;

    fn from_descriptor(header: ResourceHeader, desc: TextureDescriptor) -> Self {
        Self {
            header,
            size: desc.size,
            mip_level_count: desc.mip_level_count.max(1),
            format: desc.format,
        }
    }

    fn header(&self) -> &ResourceHeader {
        &self.header
    }

    fn store(registry: &ResourceRegistry) -> &StableStore<Self> {
        &registry.textures
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        // Destroy-on-reclaim; a no-op if destroy() already ran.
        self.destroy();
        log::trace!(
            "texture {} dropped with count {}",
            self.header.id(),
            self.header.ref_count().get()
        );
    }
}
