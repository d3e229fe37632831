use base64::Engine;
use rubato::{FastFixedIn, PolynomialDegree};

/// Sample rate the wire speaks, in Hz. Capture is resampled down to this
/// before encoding; inbound frames default to it unless tagged otherwise.
pub const WIRE_PCM16_SAMPLE_RATE: f64 = 16_000.0;

pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )?;
    Ok(resampler)
}

/// Resample by linear interpolation. Handles arbitrary input lengths, which
/// makes it the right tool for variable-size playback buffers where a
/// fixed-chunk resampler would force zero padding.
pub fn resample_linear(samples: &[f32], in_rate: f64, out_rate: f64) -> Vec<f32> {
    if samples.is_empty() || in_rate <= 0.0 || out_rate <= 0.0 {
        return Vec::new();
    }
    if (in_rate - out_rate).abs() < f64::EPSILON {
        return samples.to_vec();
    }

    let step = in_rate / out_rate;
    let out_len = ((samples.len() as f64) / step).ceil() as usize;
    let mut out = Vec::with_capacity(out_len);
    let mut pos: f64 = 0.0;
    for _ in 0..out_len {
        let idx = pos.floor() as usize;
        let fract = (pos - idx as f64) as f32;
        let a = samples.get(idx).copied().unwrap_or(0.0);
        let b = samples.get(idx + 1).copied().unwrap_or(a);
        out.push(a * (1.0 - fract) + b * fract);
        pos += step;
    }
    out
}

pub fn decode(fragment: &str) -> Vec<f32> {
    if let Ok(pcm16) = base64::engine::general_purpose::STANDARD.decode(fragment) {
        pcm16
            .chunks_exact(2)
            .map(|chunk| {
                let v = i16::from_le_bytes([chunk[0], chunk[1]]);
                (v as f32 / i16::MAX as f32).clamp(-1.0, 1.0)
            })
            .collect()
    } else {
        tracing::error!("Failed to decode base64 fragment");
        Vec::new()
    }
}

/// Saturating f32 -> i16 sample conversion; anything outside [-1.0, 1.0]
/// pins to the integer rails.
pub fn to_pcm16(pcm32: &[f32]) -> Vec<i16> {
    pcm32
        .iter()
        .map(|&sample| (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
        .collect()
}

pub fn encode(pcm32: &[f32]) -> String {
    encode_i16(&to_pcm16(pcm32))
}

pub fn encode_i16(pcm16: &[i16]) -> String {
    let bytes: Vec<u8> = pcm16
        .iter()
        .flat_map(|&sample| sample.to_le_bytes())
        .collect();
    base64::engine::general_purpose::STANDARD.encode(&bytes)
}

/// Root-mean-square of a sample block, clamped to [0, 1].
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt().clamp(0.0, 1.0)
}
