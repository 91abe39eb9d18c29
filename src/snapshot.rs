//! A single frame's worth of state, copied out of shared memory and onto the
//! consumer's own (non-shared) textures.
//!
//! A `Snapshot` is deliberately cheap to clone and hold past the call that
//! produced it: every COM pointer it carries is reference-counted, and the
//! header it carries is a private, fully-owned copy, not a borrow of the
//! mapped control region. A caller can keep rendering from the last valid
//! snapshot indefinitely if the producer stalls.

use parking_lot::Mutex;

use windows::Win32::Graphics::Direct3D11::{ID3D11Device, ID3D11ShaderResourceView, ID3D11Texture2D};

use crate::header::{Header, LayerConfig};

/// Why a [`Snapshot`] does or doesn't carry a usable frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotState {
    /// No producer is attached, or none ever has been.
    Empty,
    /// A producer is attached, but its declared [`crate::ConsumerPattern`]
    /// doesn't match the caller's [`crate::ConsumerKind`].
    IncorrectKind,
    /// Carries a usable frame.
    Valid,
}

/// A frame, plus enough context to interpret it, captured at a point in
/// time.
pub struct Snapshot {
    state: SnapshotState,
    header: Option<Box<Header>>,
    layer_textures: Vec<ID3D11Texture2D>,
    layer_srvs: Mutex<Vec<Option<ID3D11ShaderResourceView>>>,
}

impl Clone for Snapshot {
    fn clone(&self) -> Self {
        Self {
            state: self.state,
            header: self.header.clone(),
            layer_textures: self.layer_textures.clone(),
            layer_srvs: Mutex::new(self.layer_srvs.lock().clone()),
        }
    }
}

impl Snapshot {
    pub(crate) fn empty() -> Self {
        Self {
            state: SnapshotState::Empty,
            header: None,
            layer_textures: Vec::new(),
            layer_srvs: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn incorrect_kind() -> Self {
        Self {
            state: SnapshotState::IncorrectKind,
            header: None,
            layer_textures: Vec::new(),
            layer_srvs: Mutex::new(Vec::new()),
        }
    }

    /// Builds a valid snapshot from a header already copied out from under
    /// the lock, and the destination textures the caller has just finished
    /// copying the ring's shared textures into.
    pub(crate) fn valid(header: Header, layer_textures: Vec<ID3D11Texture2D>) -> Self {
        let count = layer_textures.len();
        Self {
            state: SnapshotState::Valid,
            header: Some(Box::new(header)),
            layer_textures,
            layer_srvs: Mutex::new((0..count).map(|_| None).collect()),
        }
    }

    pub fn state(&self) -> SnapshotState {
        self.state
    }

    pub fn is_valid(&self) -> bool {
        self.state == SnapshotState::Valid
    }

    /// A short, cheap-to-compare key identifying this exact frame; see
    /// [`Header::render_cache_key`].
    pub fn render_cache_key(&self) -> u64 {
        self.header.as_ref().map_or(0, |h| h.render_cache_key())
    }

    /// Sequence number for diagnostics only; `0` on a non-valid snapshot.
    pub fn sequence_number_for_debugging_only(&self) -> u32 {
        self.header.as_ref().map_or(0, |h| h.sequence_number)
    }

    pub fn config(&self) -> crate::header::GlobalConfig {
        self.header.as_ref().map_or_else(Default::default, |h| h.config)
    }

    pub fn layer_count(&self) -> u8 {
        self.header.as_ref().map_or(0, |h| h.layer_count)
    }

    pub fn layer_config(&self, layer_index: u8) -> Option<&LayerConfig> {
        let header = self.header.as_ref()?;
        if layer_index >= header.layer_count {
            return None;
        }
        let config = &header.layers[layer_index as usize];
        config.is_valid().then_some(config)
    }

    pub fn layer_texture(&self, layer_index: u8) -> Option<&ID3D11Texture2D> {
        self.layer_textures.get(layer_index as usize)
    }

    /// Returns a cached shader resource view for the layer, creating it on
    /// first access. Lazy because most frames only need some layers sampled
    /// (for example, a layer occluded by another in the current view).
    pub fn layer_shader_resource_view(
        &self,
        device: &ID3D11Device,
        layer_index: u8,
    ) -> Option<ID3D11ShaderResourceView> {
        let texture = self.layer_texture(layer_index)?;
        let mut srvs = self.layer_srvs.lock();
        let slot = srvs.get_mut(layer_index as usize)?;
        if slot.is_none() {
            let mut srv: Option<ID3D11ShaderResourceView> = None;
            if let Err(e) = unsafe { device.CreateShaderResourceView(texture, std::ptr::null(), Some(&mut srv)) } {
                log::error!("CreateShaderResourceView failed for layer {layer_index}: {e}");
                return None;
            }
            *slot = srv;
        }
        slot.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_incorrect_kind_carry_no_header() {
        assert_eq!(Snapshot::empty().state(), SnapshotState::Empty);
        assert!(!Snapshot::empty().is_valid());
        assert_eq!(Snapshot::incorrect_kind().state(), SnapshotState::IncorrectKind);
        assert_eq!(Snapshot::empty().render_cache_key(), 0);
    }

    #[test]
    fn valid_snapshot_exposes_header_fields() {
        let mut header = Header::new(99);
        header.layer_count = 1;
        header.layers[0].image_width = 64;
        header.layers[0].image_height = 32;
        let snapshot = Snapshot::valid(header, Vec::new());
        assert!(snapshot.is_valid());
        assert_eq!(snapshot.layer_count(), 1);
        assert!(snapshot.layer_config(0).is_some());
        assert!(snapshot.layer_config(1).is_none());
    }
}
