//! Fully-qualified names for every cross-process object.
//!
//! A name is the *only* compatibility contract between a producer and a
//! consumer built from different versions of this crate: there is no
//! negotiation handshake, so an incompatible consumer simply fails to open
//! an object that was never created, rather than misreading one. Every name
//! here embeds the protocol version tuple; the shared-memory name also
//! embeds `size_of::<Header>()`, so a header layout change changes the name
//! even if the version tuple is left alone.

use crate::header::Header;
use crate::{PROJECT_NAME, PROTOCOL_VERSION};
use once_cell::sync::OnceCell;

fn version_suffix() -> String {
    format!(
        "{}.{}.{}.{}",
        PROTOCOL_VERSION.major, PROTOCOL_VERSION.minor, PROTOCOL_VERSION.patch, PROTOCOL_VERSION.build
    )
}

/// Name of the named file mapping backing the shared control region.
pub fn shm_path() -> &'static str {
    static CACHE: OnceCell<String> = OnceCell::new();
    CACHE.get_or_init(|| {
        format!(
            "{}/{}-s{:x}",
            PROJECT_NAME,
            version_suffix(),
            std::mem::size_of::<Header>()
        )
    })
}

/// Name of the named mutex guarding the control region.
pub fn mutex_path() -> &'static str {
    static CACHE: OnceCell<String> = OnceCell::new();
    CACHE.get_or_init(|| format!("{}.mutex", shm_path()))
}

/// Name of a shared texture for the given session, layer, and absolute
/// sequence number. Only `sequence_number % TextureCount` of the value is
/// significant: the naming wraps so that a texture's identity is stable
/// across the lifetime of a session even though the sequence number keeps
/// climbing.
pub fn shared_texture_name(session_id: u64, layer_index: u8, sequence_number: u32) -> String {
    format!(
        "Local\\{}-{}--texture-s{:x}-l{}-b{}",
        PROJECT_NAME,
        version_suffix(),
        session_id,
        layer_index,
        sequence_number as usize % crate::header::TEXTURE_COUNT
    )
}

/// Name of the one-way mailslot used for remote commands. Fixed at
/// `v1.3` rather than derived from [`PROTOCOL_VERSION`]: this name predates
/// the version tuple and is not part of its compatibility contract.
pub fn mailslot_path() -> &'static str {
    static CACHE: OnceCell<String> = OnceCell::new();
    CACHE.get_or_init(|| format!("\\\\.\\mailslot\\{}.events.v1.3", PROJECT_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shm_path_embeds_header_size() {
        let path = shm_path();
        assert!(path.contains(&format!("{:x}", std::mem::size_of::<Header>())));
    }

    #[test]
    fn mutex_path_is_shm_path_with_suffix() {
        assert_eq!(mutex_path(), format!("{}.mutex", shm_path()));
    }

    #[test]
    fn texture_name_wraps_on_texture_count() {
        let a = shared_texture_name(0x42, 0, 1);
        let b = shared_texture_name(0x42, 0, 1 + crate::header::TEXTURE_COUNT as u32);
        assert_eq!(a, b, "ring slot naming must wrap modulo TextureCount");
    }

    #[test]
    fn texture_name_differs_by_session_layer_and_slot() {
        let base = shared_texture_name(1, 0, 0);
        assert_ne!(base, shared_texture_name(2, 0, 0));
        assert_ne!(base, shared_texture_name(1, 1, 0));
        assert_ne!(base, shared_texture_name(1, 0, 1));
    }

    #[test]
    fn mailslot_path_is_well_known() {
        assert_eq!(mailslot_path(), format!("\\\\.\\mailslot\\{}.events.v1.3", PROJECT_NAME));
    }
}
