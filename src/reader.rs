//! The consumer side of the transport.
//!
//! Split into two layers, the same way the producer side is not: a bare
//! [`Reader`] takes the device context, fence, and destination textures as
//! arguments on every call and does no device management of its own;
//! [`SingleBufferedReader`] wraps it with the device/session tracking and
//! fence-import lifecycle a typical consumer actually wants.

use windows::core::Interface;
use windows::Win32::Graphics::Direct3D11::{
    ID3D11Device, ID3D11DeviceContext, ID3D11DeviceContext4, ID3D11Texture2D, D3D11_BOX,
};

use crate::fence::ConsumerFence;
use crate::header::{ConsumerKind, MAX_LAYERS};
use crate::shm::ControlRegion;
use crate::snapshot::{Snapshot, SnapshotState};
use crate::texture_ring::{self, RingTextureResources};

/// The core, argument-driven reader.
pub struct Reader {
    region: ControlRegion,
    resources: RingTextureResources,
    cache: Snapshot,
    cached_consumer_kind: ConsumerKind,
    cached_sequence_number: u32,
}

impl Reader {
    /// Opens the control region. Returns an instance even if no producer is
    /// currently attached — callers check [`Reader::have_feeder`] (or just
    /// call `maybe_get`, which returns [`SnapshotState::Empty`] in that
    /// case) rather than failing construction, since a consumer typically
    /// starts before the host application does.
    pub fn new() -> crate::Result<Self> {
        Ok(Self {
            region: ControlRegion::open()?,
            resources: RingTextureResources::default(),
            cache: Snapshot::empty(),
            cached_consumer_kind: ConsumerKind::empty(),
            cached_sequence_number: 0,
        })
    }

    pub fn have_feeder(&self) -> bool {
        self.region.header().have_feeder()
    }

    fn render_cache_key(&self) -> u64 {
        self.region.header().render_cache_key()
    }

    /// Returns the current frame, reusing the previous call's result when
    /// nothing has changed. A cache hit needs only a plain header read, no
    /// lock wait at all; a miss takes a `try_lock` and falls back to the
    /// stale cache rather than blocking if the producer currently holds it.
    pub fn maybe_get(
        &mut self,
        ctx: &ID3D11DeviceContext4,
        fence: &ConsumerFence,
        destination_textures: &[ID3D11Texture2D],
        kind: ConsumerKind,
    ) -> Snapshot {
        if !self.have_feeder() {
            self.cache = Snapshot::empty();
            self.cached_consumer_kind = ConsumerKind::empty();
            self.cached_sequence_number = 0;
            return Snapshot::empty();
        }

        if self.cache.is_valid()
            && self.render_cache_key() == self.cache.render_cache_key()
            && kind == self.cached_consumer_kind
        {
            return self.cache.clone();
        }

        if self.region.try_lock().is_none() {
            log::trace!("couldn't acquire SHM lock in maybe_get, using stale cache");
            return self.cache.clone();
        }
        let new_snapshot = self.maybe_get_uncached(ctx, fence, destination_textures, kind);
        self.region.unlock();

        let state = new_snapshot.state();
        if state == SnapshotState::Empty && kind == self.cached_consumer_kind {
            return self.cache.clone();
        }
        if state != SnapshotState::Valid {
            return new_snapshot;
        }

        let new_sequence = new_snapshot.sequence_number_for_debugging_only();
        if new_sequence < self.cached_sequence_number {
            log::warn!(
                "sequence number went backwards! {} -> {}",
                self.cached_sequence_number,
                new_sequence
            );
        }

        self.cache = new_snapshot.clone();
        self.cached_consumer_kind = kind;
        self.cached_sequence_number = new_sequence;
        new_snapshot
    }

    /// Requires the caller to already hold the control-region lock; see
    /// [`Reader::maybe_get`], the only caller.
    fn maybe_get_uncached(
        &mut self,
        ctx: &ID3D11DeviceContext4,
        fence: &ConsumerFence,
        destination_textures: &[ID3D11Texture2D],
        kind: ConsumerKind,
    ) -> Snapshot {
        debug_assert!(self.region.is_locked(), "maybe_get_uncached without the lock");

        let header = *self.region.header();
        if kind != ConsumerKind::TEST {
            self.region.header_mut().add_active_consumer(kind);
        }

        if !header.config.target.matches(kind) {
            log::trace!(
                "consumer kind mismatch: reader is {:#x}, target is {:#x}",
                kind.bits(),
                header.config.target.raw_mask()
            );
            return Snapshot::incorrect_kind();
        }

        if !self.resources.populate(ctx, header.session_id, header.sequence_number) {
            return Snapshot::empty();
        }

        if let Err(e) = fence.wait(ctx, header.sequence_number as u64) {
            log::error!("failed to wait for fence: {e}");
            return Snapshot::empty();
        }

        let region = D3D11_BOX {
            left: 0,
            top: 0,
            front: 0,
            right: crate::TEXTURE_WIDTH,
            bottom: crate::TEXTURE_HEIGHT,
            back: 1,
        };
        let mut copied = Vec::with_capacity(header.layer_count as usize);
        for (index, destination) in destination_textures.iter().take(header.layer_count as usize).enumerate() {
            if let Some(source) = self.resources.layer(header.sequence_number, index) {
                unsafe {
                    ctx.CopySubresourceRegion(destination, 0, 0, 0, 0, source, 0, &region);
                }
                copied.push(destination.clone());
            }
        }
        unsafe { ctx.Flush() };

        if header.have_feeder() && header.layer_count > 0 {
            Snapshot::valid(header, copied)
        } else {
            Snapshot::empty()
        }
    }
}

/// Owns its own device-local destination textures and fence-import
/// lifecycle; the ergonomic entry point most consumers should use.
pub struct SingleBufferedReader {
    inner: Reader,
    device: Option<ID3D11Device>,
    session_id: u64,
    textures: Vec<ID3D11Texture2D>,
    context: Option<ID3D11DeviceContext4>,
    fence: Option<ConsumerFence>,
}

impl SingleBufferedReader {
    pub fn new() -> crate::Result<Self> {
        Ok(Self {
            inner: Reader::new()?,
            device: None,
            session_id: 0,
            textures: Vec::new(),
            context: None,
            fence: None,
        })
    }

    /// (Re-)establishes everything this reader needs on `device`: private
    /// destination textures, the immediate context cast to
    /// `ID3D11DeviceContext4`, and the duplicated/opened fence. A no-op if
    /// the device and session haven't changed since the last call — the
    /// common case, called once per frame before `maybe_get`.
    pub fn init_dx_resources(&mut self, device: &ID3D11Device) {
        let session_id = self.inner.region.header().session_id;
        let same_device = self.device.as_ref() == Some(device);
        if same_device && self.session_id == session_id {
            return;
        }
        if !self.inner.have_feeder() {
            return;
        }

        if self.inner.region.try_lock().is_none() {
            log::trace!("failed to acquire SHM lock in init_dx_resources");
            return;
        }
        self.inner.region.unlock();

        self.device = Some(device.clone());
        self.session_id = session_id;

        if session_id == 0 {
            return;
        }

        self.textures = (0..MAX_LAYERS)
            .filter_map(|_| texture_ring::create_private_texture(device).ok())
            .collect();

        let context: ID3D11DeviceContext = match unsafe { device.GetImmediateContext() } {
            Ok(ctx) => ctx,
            Err(e) => {
                log::error!("GetImmediateContext failed: {e}");
                return;
            }
        };
        self.context = context.cast::<ID3D11DeviceContext4>().ok();

        let header = *self.inner.region.header();
        if header.feeder_pid == 0 {
            return;
        }
        self.fence = ConsumerFence::open(device, header.feeder_pid, header.fence).ok();
    }

    pub fn maybe_get(&mut self, device: &ID3D11Device, kind: ConsumerKind) -> Snapshot {
        if !self.inner.have_feeder() {
            return Snapshot::empty();
        }

        self.init_dx_resources(device);

        let (Some(ctx), Some(fence)) = (self.context.clone(), self.fence.as_ref()) else {
            return Snapshot::empty();
        };
        if self.session_id == 0 {
            return Snapshot::empty();
        }

        self.inner.maybe_get(&ctx, fence, &self.textures, kind)
    }
}
