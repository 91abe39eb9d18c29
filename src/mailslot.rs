//! The one-way mailslot used by consumers (and other tooling) to post named
//! commands back to the producer.
//!
//! Unlike the control region, this channel has no reader-side API in this
//! crate: the producer application owns reading its own mailslot with
//! whatever event loop it already has (`ReadFile` on a mailslot handle
//! opened `GENERIC_READ`). This module only implements the client
//! (consumer/tool) side: encoding a packet and sending it with the reopen
//! and backoff behavior `GameEvent::Send` has.

use std::time::Instant;

use windows::Win32::Foundation::{CloseHandle, HANDLE, INVALID_HANDLE_VALUE};
use windows::Win32::Storage::FileSystem::{CreateFileW, WriteFile, FILE_SHARE_READ, OPEN_EXISTING};
use windows::Win32::System::SystemServices::GENERIC_WRITE;

use crate::config::CONFIG;
use crate::error::Result;
use crate::events::NamedEvent;
use crate::names;

/// A single name/value pair ready to go on the wire.
///
/// Wire format: `"{:08x}!<name>!{:08x}!<value>!"` — two length-prefixed,
/// `!`-terminated fields. Parsing is strict: anything that doesn't match
/// exactly (wrong length prefix, missing terminator, trailing garbage) is
/// rejected rather than partially accepted, since a malformed packet here
/// means two builds disagree about the framing, not that this one packet is
/// merely unlucky.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailslotPacket {
    pub name: String,
    pub value: String,
}

impl MailslotPacket {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into() }
    }

    /// Builds a packet for a well-known typed event, using its stable name
    /// and JSON-encoded value.
    pub fn for_event<E: NamedEvent>(event: &E) -> serde_json::Result<Self> {
        Ok(Self::new(E::NAME, serde_json::to_string(event)?))
    }

    pub fn encode(&self) -> Vec<u8> {
        format!(
            "{:08x}!{}!{:08x}!{}!",
            self.name.len(),
            self.name,
            self.value.len(),
            self.value
        )
        .into_bytes()
    }

    /// Parses a raw packet; `None` on anything that doesn't exactly match
    /// the wire format, including trailing bytes after the final `!`.
    pub fn decode(packet: &[u8]) -> Option<Self> {
        let packet = std::str::from_utf8(packet).ok()?;
        if !packet.ends_with('!') {
            return None;
        }
        // Shortest valid packet: two 8-digit hex lengths (both zero), two
        // names/values empty, three field separators, trailing terminator:
        // "00000000!!00000000!!" is 21 bytes.
        if packet.len() < "00000000!!00000000!!".len() {
            return None;
        }

        let name_len = hex_to_u32(packet.get(0..8)?)? as usize;
        let name_offset = 9;
        let name_end = name_offset.checked_add(name_len)?;
        if packet.len() < name_end + 1 || packet.as_bytes().get(name_end) != Some(&b'!') {
            return None;
        }
        let name = packet.get(name_offset..name_end)?.to_owned();

        let value_len_offset = name_end + 1;
        if packet.len() < value_len_offset + 8 {
            return None;
        }
        let value_len = hex_to_u32(packet.get(value_len_offset..value_len_offset + 8)?)? as usize;
        let value_offset = value_len_offset + 9;
        let value_end = value_offset.checked_add(value_len)?;
        if packet.len() != value_end + 1 || packet.as_bytes().get(value_end) != Some(&b'!') {
            return None;
        }
        let value = packet.get(value_offset..value_end)?.to_owned();

        Some(Self { name, value })
    }
}

fn hex_to_u32(s: &str) -> Option<u32> {
    u32::from_str_radix(s, 16).ok()
}

/// The write end of the mailslot, with the producer-side reconnect and
/// backoff behavior of `GameEvent::Send`: a failed write closes and reopens
/// the handle once and retries once, and a failed *open* isn't reattempted
/// within [`RelayConfig::mailslot_reopen_backoff`](crate::RelayConfig::mailslot_reopen_backoff)
/// of the last failure, so a consumer posting events while no producer is
/// listening doesn't spin on `CreateFileW`.
pub struct MailslotClient {
    handle: Option<HANDLE>,
    last_open_attempt: Option<Instant>,
}

impl Default for MailslotClient {
    fn default() -> Self {
        Self { handle: None, last_open_attempt: None }
    }
}

impl MailslotClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_open(&mut self) -> bool {
        if self.handle.is_some() {
            return true;
        }
        if let Some(last) = self.last_open_attempt {
            if last.elapsed() < CONFIG.mailslot_reopen_backoff() {
                return false;
            }
        }
        self.last_open_attempt = Some(Instant::now());

        let wide: Vec<u16> = names::mailslot_path().encode_utf16().chain(std::iter::once(0)).collect();
        let handle = unsafe {
            CreateFileW(
                windows::core::PCWSTR(wide.as_ptr()),
                GENERIC_WRITE.0,
                FILE_SHARE_READ,
                std::ptr::null(),
                OPEN_EXISTING,
                Default::default(),
                HANDLE::default(),
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            return false;
        }
        self.handle = Some(handle);
        true
    }

    fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            unsafe { CloseHandle(handle) };
        }
    }

    fn write_once(&self, bytes: &[u8]) -> bool {
        let Some(handle) = self.handle else { return false };
        unsafe { WriteFile(handle, Some(bytes), None, std::ptr::null_mut()) }.as_bool()
    }

    /// Sends one packet. Never blocks waiting for a producer to appear: if
    /// no mailslot currently exists, this silently does nothing (matching
    /// `GameEvent::Send`, which is fire-and-forget by design — a consumer
    /// command is advisory, not a call the producer is guaranteed to be
    /// listening for).
    pub fn send(&mut self, packet: &MailslotPacket) -> Result<()> {
        if !self.try_open() {
            return Ok(());
        }
        let bytes = packet.encode();
        if self.write_once(&bytes) {
            return Ok(());
        }

        self.close();
        if !self.try_open() {
            return Ok(());
        }
        if !self.write_once(&bytes) {
            log::warn!("failed to write mailslot packet after reopening: {}", packet.name);
        }
        Ok(())
    }

    pub fn send_event<E: NamedEvent>(&mut self, event: &E) -> Result<()> {
        let packet = MailslotPacket::for_event(event)
            .map_err(|e| crate::Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        self.send(&packet)
    }
}

impl Drop for MailslotClient {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_the_wire_format() {
        let packet = MailslotPacket::new("SetTabByID", "{\"id\":\"abc\"}");
        let encoded = packet.encode();
        assert_eq!(MailslotPacket::decode(&encoded), Some(packet));
    }

    #[test]
    fn empty_name_and_value_round_trip() {
        let packet = MailslotPacket::new("", "");
        assert_eq!(packet.encode(), b"00000000!!00000000!!");
        assert_eq!(MailslotPacket::decode(&packet.encode()), Some(packet));
    }

    #[test]
    fn rejects_corrupted_name_separator() {
        // Declares a 5-byte name but the byte right after it isn't '!'.
        assert_eq!(MailslotPacket::decode(b"00000005!helloX00000000!!"), None);
    }

    #[test]
    fn rejects_truncated_value() {
        // Claims a 10-byte value but only supplies 3.
        assert_eq!(MailslotPacket::decode(b"00000000!!0000000a!abc!"), None);
    }

    #[test]
    fn rejects_trailing_garbage_after_terminator() {
        let mut encoded = MailslotPacket::new("a", "b").encode();
        encoded.extend_from_slice(b"trailing");
        assert_eq!(MailslotPacket::decode(&encoded), None);
    }

    #[test]
    fn rejects_non_hex_length_prefix() {
        assert_eq!(MailslotPacket::decode(b"zzzzzzzz!!00000000!!"), None);
    }
}
