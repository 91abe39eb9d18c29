//! Shared D3D11 textures: producer-side creation and consumer-side lazy
//! opening by name.
//!
//! Neither side ever transfers texture *contents* directly through shared
//! memory — only the header and the fence cross the process boundary by
//! value. Textures are found by the consumer purely from their name, which
//! is why [`crate::names::shared_texture_name`] has to be deterministic
//! given only what the header already carries.

use windows::core::Interface;
use windows::Win32::Graphics::Direct3D11::{
    ID3D11Device, ID3D11Device1, ID3D11DeviceContext, ID3D11Texture2D, D3D11_BIND_RENDER_TARGET,
    D3D11_BIND_SHADER_RESOURCE, D3D11_RESOURCE_MISC_SHARED_NTHANDLE, D3D11_TEXTURE2D_DESC,
};
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_SAMPLE_DESC};
use windows::Win32::Graphics::Dxgi::DXGI_SHARED_RESOURCE_READ;

use crate::error::{Error, Result};
use crate::header::{MAX_LAYERS, TEXTURE_COUNT};
use crate::names;
use crate::{TEXTURE_HEIGHT, TEXTURE_WIDTH};

/// Shared pixel format for every ring texture. 8 bits per channel,
/// premultiplied alpha, the lowest common denominator every overlay consumer
/// already renders in.
pub const PIXEL_FORMAT: windows::Win32::Graphics::Dxgi::Common::DXGI_FORMAT =
    DXGI_FORMAT_B8G8R8A8_UNORM;

fn create_texture_desc(bind_flags: u32, misc_flags: u32) -> D3D11_TEXTURE2D_DESC {
    D3D11_TEXTURE2D_DESC {
        Width: TEXTURE_WIDTH,
        Height: TEXTURE_HEIGHT,
        MipLevels: 1,
        ArraySize: 1,
        Format: PIXEL_FORMAT,
        SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
        Usage: Default::default(),
        BindFlags: bind_flags,
        CPUAccessFlags: 0,
        MiscFlags: misc_flags,
    }
}

/// Creates one renderable, shareable-by-name texture for a single ring slot.
///
/// Called once per `(layer, slot)` when the producer starts (or restarts) a
/// session; the handle is never reused across sessions, since the name it is
/// shared under embeds the session ID.
pub(crate) fn create_producer_texture(
    device: &ID3D11Device,
    session_id: u64,
    layer_index: u8,
    sequence_number: u32,
) -> Result<ID3D11Texture2D> {
    let desc = create_texture_desc(
        D3D11_BIND_RENDER_TARGET.0 as u32 | D3D11_BIND_SHADER_RESOURCE.0 as u32,
        D3D11_RESOURCE_MISC_SHARED_NTHANDLE.0 as u32,
    );
    let mut texture: Option<ID3D11Texture2D> = None;
    unsafe { device.CreateTexture2D(&desc, std::ptr::null(), Some(&mut texture)) }
        .map_err(|e| Error::Graphics(format!("CreateTexture2D: {e}")))?;
    let texture = texture.ok_or_else(|| Error::Graphics("CreateTexture2D returned null".into()))?;

    let name = names::shared_texture_name(session_id, layer_index, sequence_number);
    let wide: Vec<u16> = name.encode_utf16().chain(std::iter::once(0)).collect();
    let resource1: windows::Win32::Graphics::Dxgi::IDXGIResource1 = texture
        .cast()
        .map_err(|e| Error::Graphics(format!("QueryInterface<IDXGIResource1>: {e}")))?;
    unsafe {
        resource1.CreateSharedHandle(
            std::ptr::null(),
            (windows::Win32::System::SystemServices::GENERIC_ALL).0,
            windows::core::PCWSTR(wide.as_ptr()),
        )
    }
    .map_err(|e| Error::Graphics(format!("IDXGIResource1::CreateSharedHandle: {e}")))?;

    Ok(texture)
}

/// Creates one of the consumer's own, non-shared destination textures: the
/// copy target a [`crate::Snapshot`] is built around. Kept separate from the
/// shared ring textures so a slow-sampling caller never holds a GPU-shared
/// resource (and therefore the producer's next write into that same ring
/// slot) open for longer than the copy itself.
pub(crate) fn create_private_texture(device: &ID3D11Device) -> Result<ID3D11Texture2D> {
    let desc = create_texture_desc(
        D3D11_BIND_RENDER_TARGET.0 as u32 | D3D11_BIND_SHADER_RESOURCE.0 as u32,
        0,
    );
    let mut texture: Option<ID3D11Texture2D> = None;
    unsafe { device.CreateTexture2D(&desc, std::ptr::null(), Some(&mut texture)) }
        .map_err(|e| Error::Graphics(format!("CreateTexture2D: {e}")))?;
    texture.ok_or_else(|| Error::Graphics("CreateTexture2D returned null".into()))
}

/// One layer slot's lazily-opened shared texture, consumer side.
#[derive(Default)]
pub(crate) struct LayerReadResources {
    texture: Option<ID3D11Texture2D>,
}

impl LayerReadResources {
    fn populate(&mut self, ctx: &ID3D11DeviceContext, session_id: u64, layer_index: u8, sequence_number: u32) -> bool {
        if self.texture.is_some() {
            return true;
        }

        let mut device: Option<ID3D11Device> = None;
        unsafe { ctx.GetDevice(&mut device) };
        let Some(device) = device else { return false };
        let Ok(device1) = device.cast::<ID3D11Device1>() else {
            return false;
        };

        let name = names::shared_texture_name(session_id, layer_index, sequence_number);
        let wide: Vec<u16> = name.encode_utf16().chain(std::iter::once(0)).collect();
        match unsafe {
            device1.OpenSharedResourceByName::<ID3D11Texture2D>(
                windows::core::PCWSTR(wide.as_ptr()),
                DXGI_SHARED_RESOURCE_READ.0 as u32,
            )
        } {
            Ok(texture) => {
                self.texture = Some(texture);
                true
            }
            Err(e) => {
                log::warn!("failed to open shared texture {name}: {e}");
                false
            }
        }
    }

    pub fn texture(&self) -> Option<&ID3D11Texture2D> {
        self.texture.as_ref()
    }
}

/// All `MAX_LAYERS` consumer-side texture handles for one ring slot. Reset
/// wholesale on a session change (a new producer, or the same producer
/// restarting) rather than diffed layer-by-layer: the session ID changing
/// means every name in the ring changed too.
pub(crate) struct TextureReadResources {
    session_id: u64,
    layers: [LayerReadResources; MAX_LAYERS],
}

impl Default for TextureReadResources {
    fn default() -> Self {
        Self {
            session_id: 0,
            layers: Default::default(),
        }
    }
}

impl TextureReadResources {
    /// Opens (or re-opens, after a session change) every layer's texture
    /// for this slot at the given absolute sequence number. Returns `false`
    /// if any layer failed to open, in which case the whole resource set is
    /// reset so the next attempt starts clean rather than retrying only the
    /// layer that failed against a half-populated ring.
    fn populate(&mut self, ctx: &ID3D11DeviceContext, session_id: u64, sequence_number: u32) -> bool {
        if session_id != self.session_id {
            log::debug!(
                "replacing texture read resources for session {session_id:x}, slot {}",
                sequence_number as usize % TEXTURE_COUNT
            );
            *self = Self {
                session_id,
                ..Default::default()
            };
        }

        for (index, layer) in self.layers.iter_mut().enumerate() {
            if !layer.populate(ctx, session_id, index as u8, sequence_number) {
                *self = Self::default();
                return false;
            }
        }

        true
    }

    fn layer(&self, index: usize) -> Option<&ID3D11Texture2D> {
        self.layers.get(index).and_then(LayerReadResources::texture)
    }
}

/// One cache per ring slot, indexed by `sequence_number % TextureCount`.
///
/// A single, non-slotted cache would open each layer's shared texture once
/// on first use and then keep sampling that same handle forever, even as
/// the producer rotates through `TextureCount` differently-named textures
/// per §4.4 — every later frame would silently resample stale bytes from
/// whichever slot happened to be current the first time a consumer called
/// in. Keeping one independently-populated cache per slot means each slot
/// is only ever opened under its own name, so a cache hit always points at
/// the texture the producer actually wrote for that sequence number.
pub(crate) struct RingTextureResources {
    slots: [TextureReadResources; TEXTURE_COUNT],
}

impl Default for RingTextureResources {
    fn default() -> Self {
        Self {
            slots: std::array::from_fn(|_| TextureReadResources::default()),
        }
    }
}

impl RingTextureResources {
    /// Opens (or re-opens, after a session change) the layer textures for
    /// the ring slot `sequence_number % TextureCount`, leaving every other
    /// slot's cache untouched.
    pub fn populate(&mut self, ctx: &ID3D11DeviceContext, session_id: u64, sequence_number: u32) -> bool {
        let slot = sequence_number as usize % TEXTURE_COUNT;
        self.slots[slot].populate(ctx, session_id, sequence_number)
    }

    /// Reads back from whichever slot was most recently populated via
    /// [`RingTextureResources::populate`] for this `sequence_number`.
    pub fn layer(&self, sequence_number: u32, index: usize) -> Option<&ID3D11Texture2D> {
        let slot = sequence_number as usize % TEXTURE_COUNT;
        self.slots[slot].layer(index)
    }
}
