use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FrameCount, StreamConfig};
use rubato::Resampler;
use tokio::sync::{mpsc, oneshot};

use voicelink_types::audio::WIRE_SAMPLE_RATE;
use voicelink_types::OutboundFrame;
use voicelink_utils as utils;
use voicelink_utils::audio::WIRE_PCM16_SAMPLE_RATE;

use crate::config::EngineConfig;
use crate::consts::{AUDIO_CHANNEL_CAPACITY, INPUT_CHUNK_SIZE};
use crate::error::AudioError;
use crate::levels::LevelMeter;

/// Exclusive owner of the input device for one session. The `cpal::Stream`
/// is not `Send`, so a dedicated thread holds it and parks until `stop()`.
pub(crate) struct CaptureHandle {
    stop_tx: std::sync::mpsc::Sender<()>,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
    chunker: Mutex<Option<tokio::task::JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl CaptureHandle {
    /// Releases the device deterministically: joins the device thread (the
    /// stream is dropped there) and aborts the chunker, so no frame can be
    /// produced after this returns. Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.stop_tx.send(());
        if let Ok(mut guard) = self.thread.lock() {
            if let Some(handle) = guard.take() {
                if handle.join().is_err() {
                    tracing::error!("capture thread panicked");
                }
            }
        }
        if let Ok(mut guard) = self.chunker.lock() {
            if let Some(task) = guard.take() {
                task.abort();
            }
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Acquires the input device and starts producing wire-ready frames.
/// Device or permission failure surfaces here, never as a silent no-op.
pub(crate) async fn start(
    config: &EngineConfig,
    level: Arc<LevelMeter>,
) -> Result<(CaptureHandle, mpsc::Receiver<OutboundFrame>), AudioError> {
    let device_name = config.input_device().map(|name| name.to_string());

    let (raw_tx, mut raw_rx) = mpsc::channel::<Vec<f32>>(AUDIO_CHANNEL_CAPACITY);
    let (frame_tx, frame_rx) = mpsc::channel::<OutboundFrame>(AUDIO_CHANNEL_CAPACITY);
    let (ready_tx, ready_rx) = oneshot::channel::<Result<u32, AudioError>>();
    let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

    let thread = std::thread::Builder::new()
        .name("voicelink-capture".to_string())
        .spawn(move || {
            let (stream, sample_rate) = match build_input_stream(device_name, raw_tx) {
                Ok(built) => built,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(AudioError::Stream(e.to_string())));
                return;
            }
            let _ = ready_tx.send(Ok(sample_rate));
            // Park until stop; dropping the stream here releases the device.
            let _ = stop_rx.recv();
        })
        .map_err(|e| AudioError::Stream(e.to_string()))?;

    let sample_rate = match ready_rx.await {
        Ok(Ok(sample_rate)) => sample_rate,
        Ok(Err(e)) => {
            let _ = thread.join();
            return Err(e);
        }
        Err(_) => {
            return Err(AudioError::Stream(
                "capture thread exited before reporting".to_string(),
            ))
        }
    };

    let mut resampler =
        utils::audio::create_resampler(sample_rate as f64, WIRE_PCM16_SAMPLE_RATE, INPUT_CHUNK_SIZE)
            .map_err(|e| AudioError::Config(e.to_string()))?;

    let chunker = tokio::spawn(async move {
        let mut pending: VecDeque<f32> = VecDeque::with_capacity(INPUT_CHUNK_SIZE * 2);
        while let Some(block) = raw_rx.recv().await {
            level.update(&block);
            pending.extend(block);
            while pending.len() >= INPUT_CHUNK_SIZE {
                let chunk: Vec<f32> = pending.drain(..INPUT_CHUNK_SIZE).collect();
                match resampler.process(&[chunk.as_slice()], None) {
                    Ok(resampled) => {
                        if let Some(resampled) = resampled.first() {
                            let samples = utils::audio::to_pcm16(resampled);
                            let frame = OutboundFrame::new(samples, WIRE_SAMPLE_RATE);
                            if let Err(e) = frame_tx.try_send(frame) {
                                tracing::warn!("dropping captured frame: {}", e);
                            }
                        }
                    }
                    Err(e) => {
                        tracing::error!("failed to resample captured audio: {}", e);
                    }
                }
            }
        }
    });

    let handle = CaptureHandle {
        stop_tx,
        thread: Mutex::new(Some(thread)),
        chunker: Mutex::new(Some(chunker)),
        stopped: AtomicBool::new(false),
    };
    Ok((handle, frame_rx))
}

fn build_input_stream(
    device_name: Option<String>,
    raw_tx: mpsc::Sender<Vec<f32>>,
) -> Result<(cpal::Stream, u32), AudioError> {
    let device = utils::device::get_or_default_input(device_name)
        .map_err(|e| AudioError::Device(e.to_string()))?;

    let default_config = device
        .default_input_config()
        .map_err(|e| AudioError::Config(e.to_string()))?;
    let stream_config = StreamConfig {
        channels: default_config.channels(),
        sample_rate: default_config.sample_rate(),
        buffer_size: cpal::BufferSize::Fixed(FrameCount::from(INPUT_CHUNK_SIZE as u32)),
    };
    let channel_count = stream_config.channels as usize;
    tracing::info!("input stream config: {:?}", &stream_config);

    // The callback must hand off and return; any real work happens on the
    // chunker task.
    let input_data_fn = move |data: &[f32], _: &cpal::InputCallbackInfo| {
        let audio = if channel_count > 1 {
            data.chunks(channel_count)
                .map(|c| c.iter().sum::<f32>() / channel_count as f32)
                .collect::<Vec<f32>>()
        } else {
            data.to_vec()
        };
        if let Err(e) = raw_tx.try_send(audio) {
            tracing::warn!("failed to send audio data to buffer: {:?}", e);
        }
    };

    let stream = device
        .build_input_stream(
            &stream_config,
            input_data_fn,
            move |err| tracing::error!("an error occurred on input stream: {}", err),
            None,
        )
        .map_err(|e| AudioError::Stream(e.to_string()))?;

    Ok((stream, stream_config.sample_rate.0))
}
