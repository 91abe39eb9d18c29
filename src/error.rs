use thiserror::Error;

/// Errors returned by setup-time and precondition-checked operations.
///
/// Transient, per-frame failures (lock contention, a kind mismatch, a
/// texture not yet visible under the session's new name) are *not*
/// represented here: they surface as [`crate::SnapshotState`] variants, so
/// that a stalled or racing consumer never has to unwind an `Err` on its hot
/// path. This enum is for failures that mean the caller misused the API, or
/// that the underlying OS call failed outright.
#[derive(Error, Debug)]
pub enum Error {
    /// `Writer::update`, `get_consumers`/`clear_consumers`, or `unlock` was
    /// called without holding the mutex. Double-locking is the same kind of
    /// misuse but is instead caught by an `assert!` in `ControlRegion`
    /// (see `shm.rs`), since both are programmer errors, not conditions a
    /// caller should branch on.
    #[error("attempted an operation that requires the lock without holding it")]
    NotLocked,

    /// `Writer::update` was given more layers than the header can store.
    #[error("asked to publish {got} layers, but the maximum is {max}")]
    TooManyLayers { got: usize, max: usize },

    /// `Writer::update` was given a layer with a zero-sized image.
    #[error("layer {layer} has a zero-sized image")]
    EmptyLayerImage { layer: usize },

    /// The control region's mapping could not be created.
    #[error("failed to create the shared control region mapping: {0}")]
    CreateMapping(String),

    /// The named mutex could not be created.
    #[error("failed to create the named mutex: {0}")]
    CreateMutex(String),

    /// The control region could not be mapped into this process.
    #[error("failed to map the shared control region: {0}")]
    MapView(String),

    /// A Direct3D device or fence call failed.
    #[error("graphics device call failed: {0}")]
    Graphics(String),

    /// I/O on the mailslot file handle.
    #[error("mailslot I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration layer failed to load.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

/// A result type that defaults to this crate's [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;
