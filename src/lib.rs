//! Cross-process shared-frame transport.
//!
//! A single producer process (the host application) renders kneeboard
//! layers into a small ring of GPU textures and publishes a sequence number
//! through a named, fixed-layout shared memory header. Any number of
//! consumer processes (typically libraries injected into third-party game
//! processes) attach to that header, open the current ring slot's textures
//! on their own device, and wait on a shared timeline fence before sampling.
//!
//! A separate one-way mailslot lets consumers post small named commands
//! back to the producer.
//!
//! Every named object (the mapping, the mutex, each texture, the mailslot)
//! embeds a version tuple and, for the mapping, the size of the header
//! struct: this is the entire compatibility contract between producer and
//! consumer builds. See [`names`] for the literal formatting rules.

#[cfg(not(windows))]
compile_error!(
    "frame-shm only supports Windows: named shared memory, mutexes, \
     mailslots, and DXGI shared textures are Win32-specific and have no \
     portable equivalent."
);

mod config;
mod error;
mod events;
mod fence;
mod header;
mod mailslot;
mod mutex;
mod names;
mod reader;
mod shm;
mod snapshot;
mod texture_ring;
mod writer;

pub use config::RelayConfig;
pub use error::{Error, Result};
pub use events::{
    BrightnessMode, MailslotEvent, MultiEvent, NamedEvent, RemoteUserAction, SetBrightnessEvent,
    SetProfileByIdEvent, SetProfileByNameEvent, SetTabByIdEvent, SetTabByIndexEvent,
    SetTabByNameEvent,
};
pub use fence::{ConsumerFence, ProducerFence};
pub use header::{ConsumerKind, ConsumerPattern, GlobalConfig, LayerConfig, MAX_LAYERS, TEXTURE_COUNT};
pub use mailslot::{MailslotClient, MailslotPacket};
pub use reader::{Reader, SingleBufferedReader};
pub use snapshot::{Snapshot, SnapshotState};
pub use writer::Writer;

/// Re-exports intended for `use frame_shm::prelude::*;`.
pub mod prelude {
    pub use crate::{
        ConsumerFence, ConsumerKind, ConsumerPattern, Error, GlobalConfig, LayerConfig,
        MailslotClient, NamedEvent, ProducerFence, Reader, RelayConfig, Result,
        SingleBufferedReader, Snapshot, SnapshotState, Writer, MAX_LAYERS, TEXTURE_COUNT,
    };
}

/// Fixed pixel dimensions of every ring texture, for every layer, for this
/// build of the protocol. Bumping either value is an ABI break and must be
/// accompanied by a version bump (see [`names`]).
pub const TEXTURE_WIDTH: u32 = 2048;
pub const TEXTURE_HEIGHT: u32 = 2048;

/// Identifies the producing application on the wire; see [`names`].
pub const PROJECT_NAME: &str = "FrameRelay";

/// The protocol version tuple embedded in every named object. Any change
/// that affects wire compatibility (header layout, texture naming, mailslot
/// framing) must bump one of these.
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
    pub build: u16,
}

pub const PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion {
    major: 1,
    minor: 0,
    patch: 0,
    build: 0,
};
