//! Texture resources.
//!
//! A [`TextureId`] names a logical bitmap resource independent of GPU
//! residency. Each texture moves through `Freed -> Loading -> Loaded` (or
//! `Failed`) and tracks the set of **renderable owners**: nodes and text
//! states that currently need it on screen. Residency accounting and
//! eviction live in [`TextureMemoryManager`](crate::TextureMemoryManager);
//! this module owns identity, state, and UV resolution.

use ahash::{HashMap, HashMapExt, HashSet, HashSetExt};

use crate::color::Color;
use crate::id::{GpuTextureId, NodeId, TextureId};
use crate::rect::Rect;

pub(crate) const BYTES_PER_PIXEL: u64 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureState {
    Freed,
    Loading,
    Loaded,
    Failed,
}

/// Discriminates the concrete texture sources.
#[derive(Debug, Clone, PartialEq)]
pub enum TextureKind {
    /// Raw RGBA8 pixels, provided up front or delivered later through the
    /// completion queue.
    Image { premultiply_alpha: bool },
    /// A 1x1 solid color. The shared white default is one of these.
    Solid { color: Color },
    /// A rectangular window into a parent texture, resolved to normalized
    /// UVs at draw time.
    Sub { parent: TextureId, region: Rect },
    /// The color attachment of a render-to-texture subtree.
    Render { node: NodeId },
}

#[derive(Debug)]
pub struct Texture {
    pub(crate) kind: TextureKind,
    pub(crate) state: TextureState,
    pub(crate) dimensions: Option<(u32, u32)>,
    /// CPU pixels staged for upload. Cleared once resident.
    pub(crate) pixels: Option<Vec<u8>>,
    pub(crate) gpu: Option<GpuTextureId>,
    pub(crate) owners: HashSet<NodeId>,
    pub(crate) error: Option<String>,
    /// Explicitly forced loads survive even with an empty owner set.
    pub(crate) force_load: bool,
}

impl Texture {
    fn new(kind: TextureKind) -> Self {
        Self {
            kind,
            state: TextureState::Freed,
            dimensions: None,
            pixels: None,
            gpu: None,
            owners: HashSet::new(),
            error: None,
            force_load: false,
        }
    }

    pub fn state(&self) -> TextureState {
        self.state
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.dimensions
    }

    /// Approximate GPU footprint once resident.
    pub fn byte_size(&self) -> u64 {
        match self.dimensions {
            Some((w, h)) => u64::from(w) * u64::from(h) * BYTES_PER_PIXEL,
            None => 0,
        }
    }

    /// Live textures have at least one renderable owner and are never
    /// evicted.
    pub fn is_live(&self) -> bool {
        !self.owners.is_empty()
    }
}

/// UVs and the concrete GPU texture a quad should sample. Sub-textures
/// resolve to their parent here.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ResolvedTexture {
    pub gpu: GpuTextureId,
    /// `(u1, v1, u2, v2)`.
    pub uv: [f32; 4],
}

/// Outcome of an owner-set mutation, consumed by the memory manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OwnerChange {
    BecameLive,
    BecameIdle,
    NoChange,
}

#[derive(Debug)]
pub(crate) struct TextureStore {
    textures: HashMap<TextureId, Texture>,
    next_id: u64,
    white: TextureId,
}

impl TextureStore {
    pub(crate) fn new() -> Self {
        let mut store = Self {
            textures: HashMap::new(),
            next_id: 0,
            white: TextureId(0),
        };
        store.white = store.create_solid(Color::WHITE);
        store
    }

    /// The engine-internal 1x1 opaque white texture substituted for quads
    /// without a texture.
    pub(crate) fn white(&self) -> TextureId {
        self.white
    }

    fn insert(&mut self, texture: Texture) -> TextureId {
        let id = TextureId(self.next_id);
        self.next_id += 1;
        self.textures.insert(id, texture);
        id
    }

    pub(crate) fn create_image(
        &mut self,
        dimensions: Option<(u32, u32)>,
        pixels: Option<Vec<u8>>,
        premultiply_alpha: bool,
    ) -> TextureId {
        let mut texture = Texture::new(TextureKind::Image { premultiply_alpha });
        texture.dimensions = dimensions;
        texture.pixels = pixels;
        self.insert(texture)
    }

    pub(crate) fn create_solid(&mut self, color: Color) -> TextureId {
        let mut texture = Texture::new(TextureKind::Solid { color });
        texture.dimensions = Some((1, 1));
        texture.pixels = Some(color.premultiplied(1.0).to_vec());
        self.insert(texture)
    }

    pub(crate) fn create_sub(&mut self, parent: TextureId, region: Rect) -> TextureId {
        let mut texture = Texture::new(TextureKind::Sub { parent, region });
        texture.dimensions = Some((region.w as u32, region.h as u32));
        self.insert(texture)
    }

    pub(crate) fn create_render(&mut self, node: NodeId, width: u32, height: u32) -> TextureId {
        let mut texture = Texture::new(TextureKind::Render { node });
        texture.dimensions = Some((width, height));
        self.insert(texture)
    }

    pub(crate) fn get(&self, id: TextureId) -> Option<&Texture> {
        self.textures.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: TextureId) -> Option<&mut Texture> {
        self.textures.get_mut(&id)
    }

    pub(crate) fn remove(&mut self, id: TextureId) -> Option<Texture> {
        self.textures.remove(&id)
    }

    /// Adds or removes a renderable owner. Sub-textures forward ownership to
    /// their parent so residency follows the actual GPU resource.
    pub(crate) fn set_renderable_owner(
        &mut self,
        id: TextureId,
        owner: NodeId,
        renderable: bool,
    ) -> OwnerChange {
        let target = self.resolve_base(id);
        let Some(texture) = self.textures.get_mut(&target) else {
            return OwnerChange::NoChange;
        };
        let was_live = texture.is_live();
        if renderable {
            texture.owners.insert(owner);
        } else {
            texture.owners.remove(&owner);
        }
        match (was_live, texture.is_live()) {
            (false, true) => OwnerChange::BecameLive,
            (true, false) => OwnerChange::BecameIdle,
            _ => OwnerChange::NoChange,
        }
    }

    /// Follows sub-texture parents to the texture that actually occupies GPU
    /// memory.
    pub(crate) fn resolve_base(&self, id: TextureId) -> TextureId {
        let mut current = id;
        while let Some(texture) = self.textures.get(&current) {
            match texture.kind {
                TextureKind::Sub { parent, .. } => current = parent,
                _ => break,
            }
        }
        current
    }

    /// Resolves a texture reference for drawing: base GPU handle plus UVs,
    /// `flip_x`/`flip_y` applied by swapping coordinate pairs. Returns `None`
    /// until the base texture is resident.
    pub(crate) fn resolve_for_draw(
        &self,
        id: TextureId,
        flip_x: bool,
        flip_y: bool,
    ) -> Option<ResolvedTexture> {
        let base_id = self.resolve_base(id);
        let base = self.textures.get(&base_id)?;
        let gpu = base.gpu?;
        let mut uv = match self.textures.get(&id)?.kind {
            TextureKind::Sub { region, .. } => {
                let (parent_w, parent_h) = base.dimensions?;
                let (parent_w, parent_h) = (parent_w as f32, parent_h as f32);
                [
                    region.x / parent_w,
                    region.y / parent_h,
                    (region.x + region.w) / parent_w,
                    (region.y + region.h) / parent_h,
                ]
            }
            _ => [0.0, 0.0, 1.0, 1.0],
        };
        if flip_x {
            uv.swap(0, 2);
        }
        if flip_y {
            uv.swap(1, 3);
        }
        Some(ResolvedTexture { gpu, uv })
    }
}

#[cfg(test)]
mod tests {
    use super::{OwnerChange, TextureState, TextureStore};
    use crate::color::Color;
    use crate::id::{GpuTextureId, NodeId};
    use crate::rect::Rect;

    #[test]
    fn store_starts_with_the_white_default() {
        let store = TextureStore::new();
        let white = store.get(store.white()).unwrap();
        assert_eq!(white.dimensions(), Some((1, 1)));
        assert_eq!(white.state(), TextureState::Freed);
    }

    #[test]
    fn owner_transitions_are_reported_once() {
        let mut store = TextureStore::new();
        let id = store.create_image(Some((16, 16)), None, false);

        assert_eq!(
            store.set_renderable_owner(id, NodeId(1), true),
            OwnerChange::BecameLive
        );
        assert_eq!(
            store.set_renderable_owner(id, NodeId(2), true),
            OwnerChange::NoChange
        );
        assert_eq!(
            store.set_renderable_owner(id, NodeId(1), false),
            OwnerChange::NoChange
        );
        assert_eq!(
            store.set_renderable_owner(id, NodeId(2), false),
            OwnerChange::BecameIdle
        );
    }

    #[test]
    fn sub_texture_ownership_lands_on_the_parent() {
        let mut store = TextureStore::new();
        let parent = store.create_image(Some((64, 64)), None, false);
        let sub = store.create_sub(parent, Rect::new(0.0, 0.0, 32.0, 32.0));

        store.set_renderable_owner(sub, NodeId(7), true);
        assert!(store.get(parent).unwrap().is_live());
        assert!(!store.get(sub).unwrap().is_live());
    }

    #[test]
    fn sub_texture_uvs_normalize_against_the_parent() {
        let mut store = TextureStore::new();
        let parent = store.create_image(Some((128, 64)), None, false);
        store.get_mut(parent).unwrap().gpu = Some(GpuTextureId(3));
        let sub = store.create_sub(parent, Rect::new(32.0, 16.0, 64.0, 32.0));

        let resolved = store.resolve_for_draw(sub, false, false).unwrap();
        assert_eq!(resolved.uv, [0.25, 0.25, 0.75, 0.75]);

        let flipped = store.resolve_for_draw(sub, true, false).unwrap();
        assert_eq!(flipped.uv, [0.75, 0.25, 0.25, 0.75]);
    }

    #[test]
    fn byte_size_uses_rgba8() {
        let mut store = TextureStore::new();
        let id = store.create_image(Some((512, 512)), None, false);
        assert_eq!(store.get(id).unwrap().byte_size(), 512 * 512 * 4);
        let _ = Color::WHITE;
    }
}
