//! In-memory memoization of encoded icon bitmaps for one geometry epoch.

use std::collections::HashMap;

use crate::sixel::RenderedBitmap;

/// Composite key for one rendered icon. The scale is stored as its
/// two-decimal rendering so that float noise below 0.005 shares an entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderKey {
    pub index: usize,
    pub width_cells: u32,
    pub height_cells: u32,
    pub scale: String,
}

impl RenderKey {
    pub fn new(index: usize, width_cells: u32, height_cells: u32, scale: f64) -> Self {
        Self {
            index,
            width_cells,
            height_cells,
            scale: format!("{scale:.2}"),
        }
    }
}

/// No expiry: correctness depends on `clear` being called whenever the
/// terminal geometry changes.
#[derive(Debug, Default)]
pub struct RenderCache {
    entries: HashMap<RenderKey, RenderedBitmap>,
    encodes: usize,
}

impl RenderCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_render(
        &mut self,
        key: RenderKey,
        render: impl FnOnce() -> RenderedBitmap,
    ) -> &RenderedBitmap {
        let encodes = &mut self.encodes;
        self.entries.entry(key).or_insert_with(|| {
            *encodes += 1;
            render()
        })
    }

    pub fn contains(&self, key: &RenderKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of times the render closure actually ran.
    pub fn encode_count(&self) -> usize {
        self.encodes
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bitmap(tag: &str) -> RenderedBitmap {
        RenderedBitmap {
            encoded: tag.to_owned(),
            pixel_width: 4,
            pixel_height: 6,
        }
    }

    #[test]
    fn identical_keys_encode_once() {
        let mut cache = RenderCache::new();
        let first = cache
            .get_or_render(RenderKey::new(0, 6, 3, 0.8), || bitmap("a"))
            .clone();
        let second = cache
            .get_or_render(RenderKey::new(0, 6, 3, 0.8), || bitmap("b"))
            .clone();

        assert_eq!(first, second);
        assert_eq!(cache.encode_count(), 1);
    }

    #[test]
    fn scale_is_compared_at_two_decimals() {
        assert_eq!(RenderKey::new(1, 2, 3, 0.5), RenderKey::new(1, 2, 3, 0.501));
        assert_ne!(RenderKey::new(1, 2, 3, 0.5), RenderKey::new(1, 2, 3, 0.51));
    }

    #[test]
    fn changing_any_field_misses() {
        let mut cache = RenderCache::new();
        cache.get_or_render(RenderKey::new(0, 6, 3, 1.0), || bitmap("base"));

        for key in [
            RenderKey::new(1, 6, 3, 1.0),
            RenderKey::new(0, 7, 3, 1.0),
            RenderKey::new(0, 6, 4, 1.0),
            RenderKey::new(0, 6, 3, 0.9),
        ] {
            assert!(!cache.contains(&key), "{key:?} should miss");
            cache.get_or_render(key, || bitmap("other"));
        }
        assert_eq!(cache.encode_count(), 5);
    }

    #[test]
    fn clear_drops_every_entry() {
        let mut cache = RenderCache::new();
        cache.get_or_render(RenderKey::new(0, 1, 1, 1.0), || bitmap("x"));
        cache.clear();
        assert!(cache.is_empty());
        assert!(!cache.contains(&RenderKey::new(0, 1, 1, 1.0)));
    }
}
