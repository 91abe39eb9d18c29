//! The cross-process GPU timeline fence.
//!
//! The producer creates one [`ID3D11Fence`] per session and shares it by NT
//! handle; a consumer never creates a fence of its own, it only opens the
//! producer's. Ownership of the raw `HANDLE` involved is unusual: the value
//! stored in the header is meaningful only inside the producer's handle
//! table, so a consumer must `DuplicateHandle` it into its own table before
//! it can be used for anything, including closing it.

use std::borrow::Cow;

use windows::core::Interface;
use windows::Win32::Foundation::{CloseHandle, GetLastError, HANDLE};
use windows::Win32::Graphics::Direct3D11::{
    ID3D11Device, ID3D11Device5, ID3D11DeviceContext4, ID3D11Fence, D3D11_FENCE_FLAG_SHARED,
};
use windows::Win32::System::Threading::{
    DuplicateHandle, GetCurrentProcess, OpenProcess, DUPLICATE_SAME_ACCESS, PROCESS_DUP_HANDLE,
};

use crate::error::{Error, Result};

trait HResult<T> {
    fn graphics(self, what: &str) -> Result<T>;
}

impl<T> HResult<T> for windows::core::Result<T> {
    fn graphics(self, what: &str) -> Result<T> {
        self.map_err(|e| Error::Graphics(format!("{what}: {e}")))
    }
}

/// Owned by the producer. The fence lives for the lifetime of a single
/// session: a new session gets a new fence, never a reused one, since a
/// consumer that cached the old shared handle would otherwise wait on a
/// fence whose value sequence restarted from zero.
pub struct ProducerFence {
    fence: ID3D11Fence,
    shared_handle: HANDLE,
}

impl ProducerFence {
    /// Creates a fresh fence at value 0, shareable across processes.
    pub fn new(device: &ID3D11Device) -> Result<Self> {
        let device5: ID3D11Device5 = device.cast().graphics("QueryInterface<ID3D11Device5>")?;
        let fence: ID3D11Fence = unsafe { device5.CreateFence(0, D3D11_FENCE_FLAG_SHARED) }
            .graphics("ID3D11Device5::CreateFence")?;
        let shared_handle = unsafe { fence.CreateSharedHandle(std::ptr::null(), 0x10000000, None) }
            .graphics("ID3D11Fence::CreateSharedHandle")?;
        Ok(Self { fence, shared_handle })
    }

    /// The process-local handle value to publish in the header. Meaningless
    /// outside this process; see module docs.
    pub fn raw_handle(&self) -> u64 {
        self.shared_handle.0 as u64
    }

    /// Signals the fence to `value` after the producer has finished
    /// recording its copy/render work for this frame. Conventionally called
    /// with the sequence number that was just committed.
    pub fn signal(&self, ctx: &ID3D11DeviceContext4, value: u64) -> Result<()> {
        unsafe { ctx.Signal(&self.fence, value) }.graphics("ID3D11DeviceContext4::Signal")
    }
}

impl Drop for ProducerFence {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.shared_handle);
        }
    }
}

unsafe impl Send for ProducerFence {}

/// Owned by a consumer. Opening one requires `PROCESS_DUP_HANDLE` rights on
/// the producer process, which is why this can fail for reasons that have
/// nothing to do with the fence itself (sandboxing, a producer that already
/// exited).
pub struct ConsumerFence {
    fence: ID3D11Fence,
}

impl ConsumerFence {
    /// Opens the producer's shared fence for use on `device`.
    ///
    /// `producer_pid` and `raw_handle` come straight from the header's
    /// `feeder_pid` and `fence` fields, written under the control-region
    /// lock; the caller is expected to have already validated the header's
    /// session before calling this.
    pub fn open(device: &ID3D11Device, producer_pid: u32, raw_handle: u64) -> Result<Self> {
        let producer = unsafe { OpenProcess(PROCESS_DUP_HANDLE, false, producer_pid) };
        if producer.is_invalid() {
            return Err(Error::Graphics(format!(
                "OpenProcess({producer_pid}) failed: {}",
                windows_last_error()
            )));
        }

        let mut duplicated = HANDLE::default();
        let ok = unsafe {
            DuplicateHandle(
                producer,
                HANDLE(raw_handle as isize),
                GetCurrentProcess(),
                &mut duplicated,
                0,
                false,
                DUPLICATE_SAME_ACCESS,
            )
        };
        unsafe { CloseHandle(producer) };
        if !ok.as_bool() {
            return Err(Error::Graphics(format!(
                "DuplicateHandle failed: {}",
                windows_last_error()
            )));
        }

        let device5: ID3D11Device5 = device.cast().graphics("QueryInterface<ID3D11Device5>")?;
        let fence: ID3D11Fence = unsafe { device5.OpenSharedFence(duplicated) }
            .graphics("ID3D11Device5::OpenSharedFence");
        unsafe { CloseHandle(duplicated) };
        let fence = fence?;

        Ok(Self { fence })
    }

    /// Blocks the GPU timeline (not the CPU) until the fence reaches
    /// `value`; call this before sampling any texture in the ring slot that
    /// commit published.
    pub fn wait(&self, ctx: &ID3D11DeviceContext4, value: u64) -> Result<()> {
        unsafe { ctx.Wait(&self.fence, value) }.graphics("ID3D11DeviceContext4::Wait")
    }
}

unsafe impl Send for ConsumerFence {}

fn windows_last_error() -> Cow<'static, str> {
    Cow::Owned(format!("{:?}", unsafe { GetLastError() }))
}
