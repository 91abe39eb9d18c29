//! The named file mapping backing the control region, and the mutex-guarded
//! access to the [`Header`] living at its start.
//!
//! Both producer and consumer map the region `FILE_MAP_WRITE`: the header
//! has fields each side writes (`active_consumers` on the consumer side,
//! everything else on the producer side), so splitting it into a
//! producer-writable and a consumer-writable region would only buy safety
//! the named mutex already provides more simply. See DESIGN.md for the
//! alternative that was considered.

use std::ffi::c_void;
use std::ptr::NonNull;

use windows::Win32::Foundation::{CloseHandle, HANDLE, INVALID_HANDLE_VALUE};
use windows::Win32::System::Memory::{
    CreateFileMappingW, FlushViewOfFile, MapViewOfFile, UnmapViewOfFile, FILE_MAP_WRITE,
    PAGE_READWRITE,
};

use crate::error::{Error, Result};
use crate::header::Header;
use crate::mutex::{LockOutcome, NamedMutex};
use crate::names;

fn to_wide(name: &str) -> Vec<u16> {
    name.encode_utf16().chain(std::iter::once(0)).collect()
}

/// A mapped view of the control region plus the named mutex that guards it.
///
/// Owned jointly by [`crate::Writer`] and [`crate::Reader`]; neither type
/// exposes it directly, since unguarded access to `mapping` would bypass the
/// mutex discipline both rely on.
pub(crate) struct ControlRegion {
    _file_handle: HANDLE,
    mutex: NamedMutex,
    mapping: NonNull<Header>,
    locked: bool,
}

unsafe impl Send for ControlRegion {}

impl ControlRegion {
    pub fn open() -> Result<Self> {
        let size = std::mem::size_of::<Header>() as u32;
        let wide_name = to_wide(names::shm_path());
        let file_handle = unsafe {
            CreateFileMappingW(
                INVALID_HANDLE_VALUE,
                std::ptr::null(),
                PAGE_READWRITE,
                0,
                size,
                windows::core::PCWSTR(wide_name.as_ptr()),
            )
        };
        if file_handle.is_invalid() {
            return Err(Error::CreateMapping(std::io::Error::last_os_error().to_string()));
        }

        let mutex = match NamedMutex::create(names::mutex_path()) {
            Ok(mutex) => mutex,
            Err(e) => {
                unsafe { CloseHandle(file_handle) };
                return Err(e);
            }
        };

        let view = unsafe { MapViewOfFile(file_handle, FILE_MAP_WRITE, 0, 0, size as usize) };
        let mapping = match NonNull::new(view as *mut Header) {
            Some(ptr) => ptr,
            None => {
                unsafe { CloseHandle(file_handle) };
                return Err(Error::MapView(std::io::Error::last_os_error().to_string()));
            }
        };

        Ok(Self {
            _file_handle: file_handle,
            mutex,
            mapping,
            locked: false,
        })
    }

    /// Block until the header is exclusively held, returning whether the
    /// previous holder left it in an abandoned (and therefore untrusted)
    /// state.
    pub fn lock(&mut self) -> LockOutcome {
        assert!(!self.locked, "ControlRegion::lock called while already held");
        let outcome = self.mutex.lock();
        self.locked = true;
        outcome
    }

    pub fn try_lock(&mut self) -> Option<LockOutcome> {
        assert!(!self.locked, "ControlRegion::try_lock called while already held");
        let outcome = self.mutex.try_lock();
        if outcome.is_some() {
            self.locked = true;
        }
        outcome
    }

    pub fn unlock(&mut self) {
        assert!(self.locked, "ControlRegion::unlock called without holding the lock");
        self.mutex.unlock();
        self.locked = false;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Read-only access to the header. Callers only rely on this being
    /// coherent while holding the lock, but a torn read outside the lock is
    /// harmless: every field here is a plain integer or POD struct, never a
    /// pointer or length describing a larger buffer.
    pub fn header(&self) -> &Header {
        unsafe { self.mapping.as_ref() }
    }

    pub fn header_mut(&mut self) -> &mut Header {
        assert!(self.locked, "mutable header access requires holding the lock");
        unsafe { self.mapping.as_mut() }
    }

    /// Forces the header's dirty pages out to the paging file. A consumer
    /// never needs this (it only ever reads the mapping back), but a
    /// producer calls it before detaching so a consumer that maps the
    /// region fresh right after sees a fully committed write rather than a
    /// page still sitting in this process's working set.
    pub fn flush(&self) {
        let size = std::mem::size_of::<Header>();
        let ok = unsafe { FlushViewOfFile(self.mapping.as_ptr() as *const c_void, size) };
        if ok == windows::Win32::Foundation::BOOL(0) {
            log::error!("FlushViewOfFile failed: {}", std::io::Error::last_os_error());
        }
    }
}

impl Drop for ControlRegion {
    fn drop(&mut self) {
        if self.locked {
            log::error!("ControlRegion dropped while still holding the lock");
            self.mutex.unlock();
        }
        unsafe {
            UnmapViewOfFile(self.mapping.as_ptr() as *const c_void);
        }
    }
}
