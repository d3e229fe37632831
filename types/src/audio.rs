/// Audio data encoded as base64
pub type Base64EncodedAudioBytes = String;

/// Sample rate the wire speaks in both directions, in Hz.
pub const WIRE_SAMPLE_RATE: u32 = 16_000;

/// A captured block of audio, already converted to the wire encoding:
/// 16-bit signed PCM, mono, at the wire sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundFrame {
    samples: Vec<i16>,
    sample_rate: u32,
}

impl OutboundFrame {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        1
    }

    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// A received block of synthesized audio, decoded from the wire into
/// f32 samples in [-1.0, 1.0].
#[derive(Debug, Clone, PartialEq)]
pub struct InboundFrame {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl InboundFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / (self.sample_rate as f64 * self.channels as f64)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
