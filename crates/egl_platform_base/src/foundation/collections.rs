//! Slot-map backed collections with stable keys
//!
//! Every registry in the crate is a slot map: entries keep their key for as
//! long as they live, and a stale key simply fails to resolve instead of
//! aliasing a newer entry.

use slotmap::{Key, KeyData};

pub use slotmap::SlotMap;

slotmap::new_key_type! {
    /// Key of a loaded platform in the platform list
    pub struct PlatformKey;
    /// Key of a display in the global display list
    pub struct DisplayKey;
    /// Key of a surface in its display's surface collection
    pub struct SurfaceKey;
    /// Key of an internal display in a platform's registry
    pub struct InternalDisplayKey;
}

/// Handle-based map using slot map for stable references
pub type HandleMap<K, T> = SlotMap<K, T>;

/// Encode a key as a raw, never-zero handle value
pub fn key_to_raw<K: Key>(key: K) -> u64 {
    key.data().as_ffi()
}

/// Decode a raw handle value back into a key
///
/// Arbitrary values are accepted; a value that was never handed out decodes
/// to a key that no map contains.
pub fn key_from_raw<K: Key>(raw: u64) -> K {
    KeyData::from_ffi(raw).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_round_trip_resolves_same_entry() {
        let mut map: HandleMap<DisplayKey, &str> = HandleMap::with_key();
        let key = map.insert("first");
        let raw = key_to_raw(key);
        assert_ne!(raw, 0);
        assert_eq!(map.get(key_from_raw::<DisplayKey>(raw)), Some(&"first"));
    }

    #[test]
    fn test_stale_raw_handle_does_not_alias() {
        let mut map: HandleMap<SurfaceKey, u32> = HandleMap::with_key();
        let old = key_to_raw(map.insert(1));
        map.remove(key_from_raw::<SurfaceKey>(old));
        let _new = map.insert(2);
        assert!(map.get(key_from_raw::<SurfaceKey>(old)).is_none());
    }

    #[test]
    fn test_garbage_raw_handle_misses() {
        let map: HandleMap<DisplayKey, u32> = HandleMap::with_key();
        assert!(map.get(key_from_raw::<DisplayKey>(0xdead_beef)).is_none());
        assert!(map.get(key_from_raw::<DisplayKey>(0)).is_none());
    }
}
