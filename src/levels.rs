use std::sync::atomic::{AtomicU32, Ordering};

use voicelink_utils as utils;

/// Instantaneous signal level shared between an audio context and UI polls.
/// Stores the f32 bit pattern in one atomic so reads stay wait-free and
/// updates stay O(frame).
#[derive(Debug, Default)]
pub struct LevelMeter {
    bits: AtomicU32,
}

impl LevelMeter {
    pub fn new() -> Self {
        Self {
            bits: AtomicU32::new(0),
        }
    }

    pub fn set(&self, level: f32) {
        self.bits
            .store(level.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn update(&self, samples: &[f32]) {
        self.set(utils::audio::rms(samples));
    }

    pub fn reset(&self) {
        self.set(0.0);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }
}
