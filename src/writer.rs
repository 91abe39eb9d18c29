//! The producer side of the transport.
//!
//! `Writer` owns the control region and the session's fence; it does not own
//! a D3D11 device or the ring textures themselves, since a producer
//! renderer already has its own device and render targets — this type only
//! publishes what it's told.

use crate::error::{Error, Result};
use crate::header::{GlobalConfig, LayerConfig, Header, ConsumerKind, MAX_LAYERS};
use crate::mutex::LockOutcome;
use crate::shm::ControlRegion;

/// The producer side of the channel. There must be at most one live `Writer`
/// per machine at a time; the named mutex doesn't enforce that directly (it
/// only serializes individual updates), but a second concurrent producer
/// would stomp the first's session ID and fence on every `update()`.
pub struct Writer {
    region: ControlRegion,
    producer_pid: u32,
}

impl Writer {
    /// Opens (creating if necessary) the control region and claims it for
    /// this process: writes a fresh header with a new session ID and marks
    /// the feeder attached.
    pub fn new() -> Result<Self> {
        let mut region = ControlRegion::open()?;
        let producer_pid = std::process::id();

        region.lock();
        *region.header_mut() = Header::new(producer_pid);
        region.header_mut().feeder_pid = producer_pid;
        region.header_mut().set_feeder_attached(true);
        region.unlock();

        Ok(Self { region, producer_pid })
    }

    pub fn lock(&mut self) -> LockOutcome {
        self.region.lock()
    }

    pub fn try_lock(&mut self) -> Option<LockOutcome> {
        self.region.try_lock()
    }

    pub fn unlock(&mut self) {
        self.region.unlock()
    }

    /// The ring slot a renderer should draw the *next* frame into, distinct
    /// from the slot the most recently committed frame is sitting in.
    pub fn next_texture_index(&self) -> u32 {
        self.region.header().sequence_number.wrapping_add(1)
    }

    pub fn next_sequence_number(&self) -> u32 {
        self.region.header().sequence_number.wrapping_add(1)
    }

    pub fn session_id(&self) -> u64 {
        self.region.header().session_id
    }

    /// Publishes a new frame. Must be called under the lock; the sequence
    /// number is always incremented by exactly one, so wraparound at
    /// `u32::MAX` simply rolls over to `0` rather than resetting the
    /// session — a consumer tracks `(session_id, sequence_number)` together,
    /// and the odds of observing the exact wraparound instant are no higher
    /// than missing any other single frame under load.
    pub fn update(&mut self, config: GlobalConfig, layers: &[LayerConfig], fence_handle: u64) -> Result<()> {
        if !self.region.is_locked() {
            return Err(Error::NotLocked);
        }
        if layers.len() > MAX_LAYERS {
            return Err(Error::TooManyLayers { got: layers.len(), max: MAX_LAYERS });
        }
        for (index, layer) in layers.iter().enumerate() {
            if !layer.is_valid() {
                return Err(Error::EmptyLayerImage { layer: index });
            }
        }

        let header = self.region.header_mut();
        header.config = config;
        header.sequence_number = header.sequence_number.wrapping_add(1);
        header.set_feeder_attached(true);
        header.layer_count = layers.len() as u8;
        header.feeder_pid = self.producer_pid;
        header.fence = fence_handle;
        for (slot, layer) in header.layers.iter_mut().zip(layers.iter()) {
            *slot = *layer;
        }
        for slot in header.layers.iter_mut().skip(layers.len()) {
            *slot = LayerConfig::default();
        }

        Ok(())
    }

    pub fn get_consumers(&self) -> Result<ConsumerKind> {
        if !self.region.is_locked() {
            return Err(Error::NotLocked);
        }
        Ok(self.region.header().active_consumers())
    }

    pub fn clear_consumers(&mut self) -> Result<()> {
        if !self.region.is_locked() {
            return Err(Error::NotLocked);
        }
        self.region.header_mut().clear_active_consumers();
        Ok(())
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        let was_locked = self.region.is_locked();
        if !was_locked {
            self.region.lock();
        }
        self.region.header_mut().set_feeder_attached(false);
        self.region.flush();
        if !was_locked {
            self.region.unlock();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // `Writer::new()` opens the one well-known control-region name; these
    // tests race each other under the default parallel test runner and must
    // be run with `--test-threads=1`.

    #[test]
    fn new_writer_attaches_and_drop_detaches() {
        let mut writer = Writer::new().expect("create writer");
        writer.lock();
        assert!(writer.region.header().have_feeder());
        writer.unlock();
        drop(writer);
    }

    #[test]
    fn update_rejects_too_many_layers() {
        let mut writer = Writer::new().expect("create writer");
        writer.lock();
        let layers = vec![LayerConfig { image_width: 1, image_height: 1, ..Default::default() }; MAX_LAYERS + 1];
        let err = writer.update(GlobalConfig::default(), &layers, 0).unwrap_err();
        assert!(matches!(err, Error::TooManyLayers { max, .. } if max == MAX_LAYERS));
        writer.unlock();
    }

    #[test]
    fn update_rejects_empty_layer_image() {
        let mut writer = Writer::new().expect("create writer");
        writer.lock();
        let layers = vec![LayerConfig::default()];
        let err = writer.update(GlobalConfig::default(), &layers, 0).unwrap_err();
        assert!(matches!(err, Error::EmptyLayerImage { layer: 0 }));
        writer.unlock();
    }

    #[test]
    fn update_without_lock_is_rejected() {
        let mut writer = Writer::new().expect("create writer");
        let err = writer.update(GlobalConfig::default(), &[], 0).unwrap_err();
        assert!(matches!(err, Error::NotLocked));
    }
}
