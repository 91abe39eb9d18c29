//! The fixed-layout control-region header and the small POD types it's
//! built from.
//!
//! Everything in this module is `#[repr(C)]` and derives `bytemuck::Pod`:
//! no pointers, no `Vec`, no enums with niches that could read as
//! uninitialized memory across a process boundary. The header is the only
//! thing that physically crosses the process boundary by value (as opposed
//! to by name, like the textures, or by explicit duplication, like the
//! fence handle), so it has to be plain old data end to end.

use bytemuck::{Pod, Zeroable};

/// Maximum number of layers a single frame can carry. Chosen generously
/// above what a kneeboard overlay realistically renders (typically one or
/// two: the panel itself and a VR gaze reticle); see DESIGN.md for the
/// reasoning.
pub const MAX_LAYERS: usize = 8;

/// Number of textures in the per-layer ring. Three gives the producer one
/// slot to render into, one slot mid-flight for a slow consumer, and one
/// slot already fully consumed, without the producer ever being forced to
/// wait on a consumer's fence.
pub const TEXTURE_COUNT: usize = 3;

/// 8-byte ASCII magic written at the front of every valid header. A header
/// zeroed by the abandoned-mutex recovery path (or simply never
/// initialized) reads as all-zero bytes here, which never matches.
pub const MAGIC: [u8; 8] = *b"FRAMESHM";

bitflags::bitflags! {
    #[derive(Pod, Zeroable)]
    #[repr(transparent)]
    struct HeaderFlags: u32 {
        /// Set for the lifetime of a live producer; cleared by `Writer`'s
        /// destructor under lock.
        const FEEDER_ATTACHED = 1 << 0;
    }
}

bitflags::bitflags! {
    /// Disjoint flags identifying a consumer's rendering backend, plus a
    /// neutral `TEST` role used by this crate's own tests and by tooling
    /// that wants to observe the channel without being matched by any
    /// producer's target mask.
    #[derive(Pod, Zeroable)]
    #[repr(transparent)]
    pub struct ConsumerKind: u32 {
        const TEST = 1 << 0;
        const D3D11 = 1 << 1;
        const D3D12 = 1 << 2;
    }
}

/// A producer-declared mask of which [`ConsumerKind`]s a frame is valid
/// for.
///
/// Matching is **subset-of-kind**, not intersection: `matches(kind)` holds
/// iff every bit set in the pattern is also set in `kind`. A producer that
/// sets `D3D11 | D3D12` is saying "this frame was rendered in a form only a
/// consumer that can sample *both* APIs can use" (for example, a shared
/// resource opened through an interop path that only consumers supporting
/// both backends know how to use) — a consumer declaring only `D3D11` is
/// rejected, even though its kind overlaps the mask.
#[derive(Clone, Copy, PartialEq, Eq, Pod, Zeroable, Default)]
#[repr(transparent)]
pub struct ConsumerPattern {
    mask: u32,
}

impl ConsumerPattern {
    pub fn new(mask: ConsumerKind) -> Self {
        Self { mask: mask.bits() }
    }

    pub fn matches(self, kind: ConsumerKind) -> bool {
        (self.mask & kind.bits()) == self.mask
    }

    /// Raw mask, for diagnostics only.
    pub fn raw_mask(self) -> u32 {
        self.mask
    }
}

/// Per-frame configuration shared by every layer: currently just the
/// consumer-kind target. Kept as its own struct (rather than inlined into
/// [`Header`]) because a producer renderer composes it once per frame
/// alongside the per-layer configs, mirroring how `Writer::update` receives
/// it.
#[derive(Clone, Copy, Pod, Zeroable, Default)]
#[repr(C)]
pub struct GlobalConfig {
    pub target: ConsumerPattern,
}

/// Per-layer placement and image metadata.
///
/// Position/size/pose fields are left as plain `f32`s rather than a
/// dedicated math type: the core transport doesn't interpret them, it only
/// carries them from producer to consumer, so pulling in a math crate here
/// would be dead weight.
#[derive(Clone, Copy, Pod, Zeroable, Default)]
#[repr(C)]
pub struct LayerConfig {
    pub vr_x: f32,
    pub vr_y: f32,
    pub vr_z: f32,
    pub vr_rx: f32,
    pub vr_ry: f32,
    pub vr_rz: f32,
    pub vr_width: f32,
    pub vr_height: f32,
    pub image_width: u32,
    pub image_height: u32,
}

impl LayerConfig {
    pub fn is_valid(&self) -> bool {
        self.image_width > 0 && self.image_height > 0
    }
}

/// The fixed-layout header occupying offset 0 of the control-region
/// mapping.
///
/// `layers` is a fixed-size inline array, not a `Vec`: nothing in this
/// struct may contain a pointer or a length that a different process'
/// address space would need to dereference. Only `layers[..layer_count]`
/// is meaningful; the remainder is left however the last writer happened to
/// leave it, which is why `LayerConfig::is_valid` exists — readers must not
/// trust an index past `layer_count` to be zeroed.
#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct Header {
    pub magic: [u8; 8],
    pub sequence_number: u32,
    pub session_id: u64,
    flags: u32,
    pub config: GlobalConfig,
    pub feeder_pid: u32,
    /// Producer-process-local handle value of the shared fence. Consumers
    /// must duplicate this across processes; it is meaningless read
    /// directly in another process' handle table.
    pub fence: u64,
    pub layer_count: u8,
    _pad: [u8; 3],
    pub layers: [LayerConfig; MAX_LAYERS],
    active_consumers: u32,
}

impl Header {
    /// A session ID mixes the producer's PID into the high bits so that two
    /// producers running concurrently (which the named mutex already
    /// prevents for the *same* project/version) or a rapid restart can never
    /// collide, and a random low 32 bits so a restarted producer with the
    /// same PID (PID reuse) still gets a distinct ID.
    pub fn new_session_id(producer_pid: u32) -> u64 {
        let random: u32 = rand::random();
        ((producer_pid as u64) << 32) | u64::from(random)
    }

    /// A fresh header for a newly-constructed producer: valid magic, a new
    /// session ID, everything else zeroed.
    pub fn new(producer_pid: u32) -> Self {
        Self {
            magic: MAGIC,
            sequence_number: 0,
            session_id: Self::new_session_id(producer_pid),
            flags: 0,
            config: GlobalConfig::default(),
            feeder_pid: 0,
            fence: 0,
            layer_count: 0,
            _pad: [0; 3],
            layers: [LayerConfig::default(); MAX_LAYERS],
            active_consumers: 0,
        }
    }

    pub fn feeder_attached(&self) -> bool {
        HeaderFlags::from_bits_truncate(self.flags).contains(HeaderFlags::FEEDER_ATTACHED)
    }

    pub(crate) fn set_feeder_attached(&mut self, attached: bool) {
        let mut flags = HeaderFlags::from_bits_truncate(self.flags);
        flags.set(HeaderFlags::FEEDER_ATTACHED, attached);
        self.flags = flags.bits();
    }

    /// `true` iff the magic is valid *and* the producer is currently live.
    /// A header with valid magic but a cleared `FEEDER_ATTACHED` means the
    /// producer detached cleanly; callers should treat that the same as
    /// `Empty`, not as a protocol error.
    pub fn have_feeder(&self) -> bool {
        self.magic == MAGIC && self.feeder_attached()
    }

    pub fn active_consumers(&self) -> ConsumerKind {
        ConsumerKind::from_bits_truncate(self.active_consumers)
    }

    pub(crate) fn add_active_consumer(&mut self, kind: ConsumerKind) {
        self.active_consumers |= kind.bits();
    }

    pub(crate) fn clear_active_consumers(&mut self) {
        self.active_consumers = 0;
    }

    /// A short hash of `(session_id, sequence_number)` that a reader can use
    /// to cheaply tell "have I already processed this exact frame" without
    /// comparing the full header. It's only as good as the assumption that
    /// `session_id` is already well-distributed (it has 32 random bits) and
    /// that we're combining exactly one more varying value; if more fields
    /// ever need to participate, this should become a real hash-combine
    /// instead of a bare XOR.
    pub fn render_cache_key(&self) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut session_hasher = DefaultHasher::new();
        self.session_id.hash(&mut session_hasher);
        let mut sequence_hasher = DefaultHasher::new();
        self.sequence_number.hash(&mut sequence_hasher);
        session_hasher.finish() ^ sequence_hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_plain_old_data() {
        // bytemuck's derive already enforces this at compile time for
        // `Pod`/`Zeroable`; this test just pins the size so a future layout
        // change is a visible diff here (and, via `names::shm_path`, a
        // visible change to the mapping name).
        assert_eq!(std::mem::size_of::<Header>() % std::mem::align_of::<Header>(), 0);
    }

    #[test]
    fn fresh_header_has_no_feeder() {
        let header = Header::new(1234);
        assert_eq!(header.magic, MAGIC);
        assert!(!header.have_feeder());
    }

    #[test]
    fn feeder_attached_round_trips() {
        let mut header = Header::new(1);
        header.set_feeder_attached(true);
        assert!(header.have_feeder());
        header.set_feeder_attached(false);
        assert!(!header.have_feeder());
    }

    #[test]
    fn zeroed_header_never_has_a_feeder() {
        let header: Header = Zeroable::zeroed();
        assert_ne!(header.magic, MAGIC);
        assert!(!header.have_feeder());
    }

    #[test]
    fn layer_config_validity() {
        let mut layer = LayerConfig::default();
        assert!(!layer.is_valid());
        layer.image_width = 10;
        assert!(!layer.is_valid());
        layer.image_height = 10;
        assert!(layer.is_valid());
    }

    #[test]
    fn consumer_pattern_is_subset_not_intersection() {
        let target = ConsumerPattern::new(ConsumerKind::D3D11 | ConsumerKind::D3D12);
        assert!(!target.matches(ConsumerKind::D3D11));
        assert!(!target.matches(ConsumerKind::D3D12));
        assert!(target.matches(ConsumerKind::D3D11 | ConsumerKind::D3D12));
        assert!(target.matches(ConsumerKind::D3D11 | ConsumerKind::D3D12 | ConsumerKind::TEST));
    }

    #[test]
    fn empty_pattern_matches_everything() {
        let target = ConsumerPattern::default();
        assert!(target.matches(ConsumerKind::empty()));
        assert!(target.matches(ConsumerKind::D3D11));
    }

    #[test]
    fn render_cache_key_differs_across_sequence_numbers() {
        let mut header = Header::new(1);
        header.sequence_number = 1;
        let a = header.render_cache_key();
        header.sequence_number = 2;
        let b = header.render_cache_key();
        assert_ne!(a, b);
    }

    #[test]
    fn active_consumers_accumulate() {
        let mut header = Header::new(1);
        assert_eq!(header.active_consumers(), ConsumerKind::empty());
        header.add_active_consumer(ConsumerKind::D3D11);
        header.add_active_consumer(ConsumerKind::D3D12);
        assert_eq!(
            header.active_consumers(),
            ConsumerKind::D3D11 | ConsumerKind::D3D12
        );
        header.clear_active_consumers();
        assert_eq!(header.active_consumers(), ConsumerKind::empty());
    }
}
