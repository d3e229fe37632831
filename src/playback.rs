use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FrameCount, StreamConfig};
use tokio::sync::oneshot;

use voicelink_types::InboundFrame;
use voicelink_utils as utils;

use crate::config::EngineConfig;
use crate::consts::OUTPUT_CHUNK_SIZE;
use crate::error::AudioError;
use crate::levels::LevelMeter;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum EnqueueOutcome {
    Scheduled { start: f64 },
    Stale,
}

/// Pure scheduling core: the running playback cursor plus the flush
/// generation. `next_start` is seconds on the scheduler's clock; buffers
/// admitted back-to-back butt up against each other exactly, and a buffer
/// admitted after the queue drained starts at "now" rather than in the past.
#[derive(Debug)]
struct Schedule {
    generation: u64,
    next_start: f64,
}

impl Schedule {
    fn new() -> Self {
        Self {
            generation: 0,
            next_start: 0.0,
        }
    }

    fn reserve(&mut self, now: f64, duration: f64) -> f64 {
        let start = if self.next_start > now {
            self.next_start
        } else {
            now
        };
        self.next_start = start + duration;
        start
    }

    /// Admission check and reservation in one step: a buffer stamped before
    /// the last flush is refused.
    fn admit(&mut self, generation: u64, now: f64, duration: f64) -> Option<f64> {
        if generation < self.generation {
            return None;
        }
        Some(self.reserve(now, duration))
    }

    fn flush(&mut self, now: f64) {
        self.generation += 1;
        self.next_start = now;
    }
}

struct PlaybackShared {
    schedule: Mutex<Schedule>,
    // Device-rate mono samples awaiting the output callback. Lock order is
    // always schedule -> queue.
    queue: Mutex<VecDeque<f32>>,
    level: LevelMeter,
    epoch: Instant,
}

/// Exclusive owner of the output device for one session. Buffers enqueue at
/// network cadence; the device callback drains at the device clock.
pub(crate) struct PlaybackScheduler {
    shared: Arc<PlaybackShared>,
    device_rate: u32,
    stop_tx: std::sync::mpsc::Sender<()>,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl PlaybackScheduler {
    pub async fn start(config: &EngineConfig) -> Result<Self, AudioError> {
        let device_name = config.output_device().map(|name| name.to_string());

        let shared = Arc::new(PlaybackShared {
            schedule: Mutex::new(Schedule::new()),
            queue: Mutex::new(VecDeque::new()),
            level: LevelMeter::new(),
            epoch: Instant::now(),
        });

        let (ready_tx, ready_rx) = oneshot::channel::<Result<u32, AudioError>>();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        let thread_shared = shared.clone();
        let thread = std::thread::Builder::new()
            .name("voicelink-playback".to_string())
            .spawn(move || {
                let (stream, device_rate) =
                    match build_output_stream(device_name, thread_shared) {
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
                let _ = ready_tx.send(Ok(device_rate));
                let _ = stop_rx.recv();
            })
            .map_err(|e| AudioError::Stream(e.to_string()))?;

        let device_rate = match ready_rx.await {
            Ok(Ok(device_rate)) => device_rate,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                return Err(AudioError::Stream(
                    "playback thread exited before reporting".to_string(),
                ))
            }
        };

        Ok(Self {
            shared,
            device_rate,
            stop_tx,
            thread: Mutex::new(Some(thread)),
            stopped: AtomicBool::new(false),
        })
    }

    /// Generation stamp for a frame about to enter the playback pipeline;
    /// compared again at `enqueue` so a flush in between wins.
    pub fn generation(&self) -> u64 {
        self.shared
            .schedule
            .lock()
            .map(|schedule| schedule.generation)
            .unwrap_or(0)
    }

    pub fn enqueue(&self, frame: &InboundFrame, generation: u64) -> EnqueueOutcome {
        let samples = if frame.channels() > 1 {
            let channels = frame.channels() as usize;
            frame
                .samples()
                .chunks(channels)
                .map(|c| c.iter().sum::<f32>() / channels as f32)
                .collect::<Vec<f32>>()
        } else {
            frame.samples().to_vec()
        };
        let resampled = utils::audio::resample_linear(
            &samples,
            frame.sample_rate() as f64,
            self.device_rate as f64,
        );

        let Ok(mut schedule) = self.shared.schedule.lock() else {
            return EnqueueOutcome::Stale;
        };
        let now = self.now();
        match schedule.admit(generation, now, frame.duration_secs()) {
            None => {
                tracing::debug!(
                    "dropping stale playback frame (generation {} < {})",
                    generation,
                    schedule.generation
                );
                EnqueueOutcome::Stale
            }
            Some(start) => {
                // Queue append happens under the schedule lock so a flush
                // cannot slip between admission and append.
                if let Ok(mut queue) = self.shared.queue.lock() {
                    queue.extend(resampled);
                }
                EnqueueOutcome::Scheduled { start }
            }
        }
    }

    /// Barge-in: every pending buffer vanishes as a unit and the clock
    /// resets to now. Frames still in flight carry an older generation and
    /// are refused on arrival.
    pub fn flush_all(&self) {
        if let Ok(mut schedule) = self.shared.schedule.lock() {
            schedule.flush(self.now());
            if let Ok(mut queue) = self.shared.queue.lock() {
                queue.clear();
            }
            tracing::debug!("flushed playback queue, generation now {}", schedule.generation);
        }
    }

    pub fn output_level(&self) -> f32 {
        self.shared.level.get()
    }

    /// Joins the device thread, dropping the output stream. Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.stop_tx.send(());
        if let Ok(mut guard) = self.thread.lock() {
            if let Some(handle) = guard.take() {
                if handle.join().is_err() {
                    tracing::error!("playback thread panicked");
                }
            }
        }
        self.shared.level.reset();
    }

    fn now(&self) -> f64 {
        self.shared.epoch.elapsed().as_secs_f64()
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_output_stream(
    device_name: Option<String>,
    shared: Arc<PlaybackShared>,
) -> Result<(cpal::Stream, u32), AudioError> {
    let device = utils::device::get_or_default_output(device_name)
        .map_err(|e| AudioError::Device(e.to_string()))?;

    let default_config = device
        .default_output_config()
        .map_err(|e| AudioError::Config(e.to_string()))?;
    let stream_config = StreamConfig {
        channels: default_config.channels(),
        sample_rate: default_config.sample_rate(),
        buffer_size: cpal::BufferSize::Fixed(FrameCount::from(OUTPUT_CHUNK_SIZE as u32)),
    };
    let channel_count = stream_config.channels as usize;
    tracing::info!("output stream config: {:?}", &stream_config);

    let output_data_fn = move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
        let frames = data.len() / channel_count.max(1);
        match shared.queue.lock() {
            Ok(mut queue) => {
                let mut sum = 0.0f32;
                for frame in data.chunks_mut(channel_count.max(1)) {
                    let sample = queue.pop_front().unwrap_or(0.0);
                    sum += sample * sample;
                    for channel in frame.iter_mut() {
                        *channel = sample;
                    }
                }
                if frames > 0 {
                    shared.level.set((sum / frames as f32).sqrt());
                }
            }
            Err(_) => {
                for sample in data.iter_mut() {
                    *sample = 0.0;
                }
            }
        }
    };

    let stream = device
        .build_output_stream(
            &stream_config,
            output_data_fn,
            move |err| tracing::error!("an error occurred on output stream: {}", err),
            None,
        )
        .map_err(|e| AudioError::Stream(e.to_string()))?;

    Ok((stream, stream_config.sample_rate.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_times_are_monotonic_and_gapless() {
        let mut schedule = Schedule::new();
        let durations = [0.1, 0.25, 0.05, 0.3];
        let mut starts = Vec::new();
        for duration in durations {
            starts.push(schedule.reserve(0.0, duration));
        }
        assert_eq!(starts[0], 0.0);
        for i in 1..starts.len() {
            assert!(starts[i] >= starts[i - 1] + durations[i - 1] - 1e-9);
        }
        assert!((schedule.next_start - 0.7).abs() < 1e-9);
    }

    #[test]
    fn drained_queue_schedules_at_now_not_in_the_past() {
        let mut schedule = Schedule::new();
        assert_eq!(schedule.reserve(0.0, 0.1), 0.0);
        // Clock has moved past the end of the last buffer.
        assert_eq!(schedule.reserve(5.0, 0.1), 5.0);
    }

    #[test]
    fn flush_resets_clock_and_invalidates_older_generations() {
        let mut schedule = Schedule::new();
        // 200 ms then 150 ms enqueued at now=0.
        let stamp = schedule.generation;
        assert_eq!(schedule.admit(stamp, 0.0, 0.2), Some(0.0));
        assert_eq!(schedule.admit(stamp, 0.0, 0.15), Some(0.2));

        // Barge-in at t=0.05 cancels both.
        schedule.flush(0.05);
        assert_eq!(schedule.next_start, 0.05);

        // A frame stamped before the flush never schedules.
        assert_eq!(schedule.admit(stamp, 0.06, 0.1), None);

        // A fresh frame at t=0.06 starts at 0.06, not 0.35.
        let fresh = schedule.generation;
        assert_eq!(schedule.admit(fresh, 0.06, 0.1), Some(0.06));
    }

    #[test]
    fn repeated_flushes_keep_invalidating() {
        let mut schedule = Schedule::new();
        let g0 = schedule.generation;
        schedule.flush(1.0);
        let g1 = schedule.generation;
        schedule.flush(2.0);
        assert_eq!(schedule.admit(g0, 2.5, 0.1), None);
        assert_eq!(schedule.admit(g1, 2.5, 0.1), None);
        assert_eq!(schedule.admit(schedule.generation, 2.5, 0.1), Some(2.5));
    }
}
