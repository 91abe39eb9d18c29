//! The named mutex guarding every mutation of the control region.
//!
//! Modeled as a `lock()`/`try_lock()`/`unlock()` trio rather than
//! `std::sync::Mutex`'s RAII guard, because the lifetime of the lock here is
//! tied to the *protocol* (a producer's whole `update()` call, or a
//! consumer's whole `maybe_get_uncached()`), not to a Rust scope that the
//! borrow checker can see across an FFI-ish boundary (the GPU fence wait in
//! between). Double-locking and unlocking-without-locking are both
//! programmer errors: they panic rather than returning a `Result`, the same
//! way indexing out of bounds does.

use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_TIMEOUT};
use windows::Win32::System::Threading::{CreateMutexW, ReleaseMutex, WaitForSingleObject, WAIT_ABANDONED, WAIT_OBJECT_0};

use crate::error::{Error, Result};

/// Encodes `name` as the null-terminated UTF-16 Win32 APIs expect.
fn to_wide(name: &str) -> Vec<u16> {
    name.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Outcome of acquiring the named mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// Acquired with no prior owner trouble.
    Acquired,
    /// Acquired, but the previous owner terminated while holding it. The
    /// caller must treat whatever the control region currently holds as
    /// lost and zero it.
    AcquiredAbandoned,
}

/// Thin RAII wrapper around a named `HANDLE` to a Win32 mutex.
///
/// This type owns the handle but does *not* track whether it is currently
/// held — that's the job of the caller (`shm::ControlRegion`), which needs
/// to panic on misuse rather than silently no-op.
pub(crate) struct NamedMutex {
    handle: HANDLE,
}

unsafe impl Send for NamedMutex {}

impl NamedMutex {
    pub fn create(name: &str) -> Result<Self> {
        let wide = to_wide(name);
        let handle = unsafe {
            CreateMutexW(std::ptr::null(), false, windows::core::PCWSTR(wide.as_ptr()))
        };
        if handle.is_invalid() {
            return Err(Error::CreateMutex(
                std::io::Error::last_os_error().to_string(),
            ));
        }
        Ok(Self { handle })
    }

    /// Block until the mutex is acquired.
    pub fn lock(&self) -> LockOutcome {
        match unsafe { WaitForSingleObject(self.handle, u32::MAX) } {
            WAIT_OBJECT_0 => LockOutcome::Acquired,
            WAIT_ABANDONED => LockOutcome::AcquiredAbandoned,
            other => unreachable!("unexpected WaitForSingleObject result in lock(): 0x{other:x}"),
        }
    }

    /// Attempt to acquire the mutex without blocking.
    pub fn try_lock(&self) -> Option<LockOutcome> {
        match unsafe { WaitForSingleObject(self.handle, 0) } {
            WAIT_OBJECT_0 => Some(LockOutcome::Acquired),
            WAIT_ABANDONED => Some(LockOutcome::AcquiredAbandoned),
            other if other == WAIT_TIMEOUT.0 => None,
            other => unreachable!("unexpected WaitForSingleObject result in try_lock(): 0x{other:x}"),
        }
    }

    pub fn unlock(&self) {
        if unsafe { ReleaseMutex(self.handle) } == windows::Win32::Foundation::BOOL(0) {
            log::error!(
                "ReleaseMutex failed: {}",
                std::io::Error::last_os_error()
            );
        }
    }
}

impl Drop for NamedMutex {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name(case: &str) -> String {
        format!(
            "frame-shm-tests-{case}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        )
    }

    #[test]
    fn lock_then_try_lock_from_same_thread_reenters() {
        let mutex = NamedMutex::create(&unique_name("reentrant")).expect("create mutex");
        assert_eq!(mutex.lock(), LockOutcome::Acquired);
        // Win32 named mutexes are recursive on the owning thread: a second
        // acquisition succeeds immediately instead of deadlocking.
        assert_eq!(mutex.try_lock(), Some(LockOutcome::Acquired));
        mutex.unlock();
        mutex.unlock();
    }

    #[test]
    fn try_lock_fails_while_held_by_another_thread() {
        let name = unique_name("contended");
        let mutex = NamedMutex::create(&name).expect("create mutex");
        assert_eq!(mutex.lock(), LockOutcome::Acquired);

        let held = std::thread::spawn(move || {
            let other = NamedMutex::create(&name).expect("create mutex on other thread");
            other.try_lock()
        })
        .join()
        .unwrap();

        assert_eq!(held, None, "a second thread must not observe the mutex as free");
        mutex.unlock();
    }
}
