//! # Audio Capture Module
//!
//! Real-time microphone capture through CPAL. The device callback cuts the
//! incoming stream into overlapping, power-of-two analysis buffers and pushes
//! them into a bounded channel. When the consumer falls behind, the oldest
//! queued buffer is discarded so analysis always works on recent audio.
//!
//! ## Features
//! - Exclusive capture: one live [`CaptureHandle`] per [`Microphone`]
//! - Device and format selection with multi-channel downmix
//! - Overlapping framing ([`Framer`])
//! - Drop-oldest backpressure ([`FrameSender`])

use anyhow::Context;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SupportedStreamConfigRange;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::{BUFFER_SIZE, HOP_SIZE, SAMPLE_RATE};
use crate::error::{Result, TunerError};

/// Buffers queued between capture and processing.
pub const FRAME_QUEUE_CAPACITY: usize = 8;

/// Cuts a continuous sample stream into overlapping frames.
#[derive(Debug, Clone)]
pub struct Framer {
    buffer_size: usize,
    hop_size: usize,
    pending: Vec<f32>,
}

impl Framer {
    /// Frames of `buffer_size` samples starting every `hop_size` samples.
    pub fn new(buffer_size: usize, hop_size: usize) -> Self {
        Self {
            buffer_size,
            hop_size: hop_size.clamp(1, buffer_size.max(1)),
            pending: Vec::with_capacity(buffer_size * 2),
        }
    }

    /// Appends samples and returns every frame that became complete.
    pub fn push(&mut self, data: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(data);
        let mut frames = Vec::new();
        while self.pending.len() >= self.buffer_size {
            frames.push(self.pending[..self.buffer_size].to_vec());
            self.pending.drain(..self.hop_size);
        }
        frames
    }

    /// Discards any partial frame.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Sending half of a drop-oldest frame queue.
#[derive(Debug, Clone)]
pub struct FrameSender {
    tx: Sender<Vec<f32>>,
    rx: Receiver<Vec<f32>>,
    dropped: Arc<AtomicU64>,
}

/// Creates a bounded frame queue that discards its oldest entry when full.
pub fn frame_channel(capacity: usize) -> (FrameSender, Receiver<Vec<f32>>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    let sender = FrameSender {
        tx,
        rx: rx.clone(),
        dropped: Arc::new(AtomicU64::new(0)),
    };
    (sender, rx)
}

impl FrameSender {
    /// Queues a frame, evicting the oldest queued frame when full.
    pub fn send(&self, frame: Vec<f32>) {
        match self.tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(frame)) => {
                if self.rx.try_recv().is_ok() {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
                // Another producer may have refilled the slot; then this
                // frame is the one dropped.
                if self.tx.try_send(frame).is_err() {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
            // The sender holds a receiver clone, so the queue cannot close.
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Frames discarded so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Exclusive claim on the microphone; released on drop.
#[derive(Debug)]
pub struct CaptureLease {
    busy: Arc<AtomicBool>,
}

impl Drop for CaptureLease {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
        debug!("microphone released");
    }
}

/// The capture resource. Cloning shares the same exclusivity flag.
#[derive(Debug, Clone)]
pub struct Microphone {
    busy: Arc<AtomicBool>,
    buffer_size: usize,
    hop_size: usize,
}

impl Default for Microphone {
    fn default() -> Self {
        Self::new()
    }
}

impl Microphone {
    /// A microphone producing the default 4096-sample, 1024-hop frames.
    pub fn new() -> Self {
        Self::with_framing(BUFFER_SIZE, HOP_SIZE)
    }

    /// A microphone with custom framing.
    pub fn with_framing(buffer_size: usize, hop_size: usize) -> Self {
        Self {
            busy: Arc::new(AtomicBool::new(false)),
            buffer_size,
            hop_size,
        }
    }

    /// True while a capture handle or lease is alive.
    pub fn is_capturing(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Claims exclusive use without opening a device.
    ///
    /// # Errors
    /// * `TunerError::AlreadyCapturing` - another claim is still alive
    pub fn lease(&self) -> Result<CaptureLease> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| TunerError::AlreadyCapturing)?;
        Ok(CaptureLease {
            busy: Arc::clone(&self.busy),
        })
    }

    /// Starts capturing from the default input device.
    ///
    /// Frames are pushed into `frames` from the device callback thread.
    ///
    /// # Errors
    /// * `TunerError::AlreadyCapturing` - a handle is still alive
    /// * `TunerError::NoInputDevice` - the host has no input device
    /// * `TunerError::UnsupportedFormat` - no f32 input format
    /// * `TunerError::Stream` - the stream could not be built or started
    pub fn start(&self, frames: FrameSender) -> Result<CaptureHandle> {
        let lease = self.lease()?;

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(TunerError::NoInputDevice)?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());

        let configs = device
            .supported_input_configs()
            .context("querying input configurations")?
            .collect::<Vec<_>>();
        let supported = find_supported_config(configs, SAMPLE_RATE).ok_or_else(|| {
            TunerError::UnsupportedFormat(format!("{device_name} offers no f32 input"))
        })?;

        let target = cpal::SampleRate(SAMPLE_RATE);
        let in_range =
            supported.min_sample_rate() <= target && target <= supported.max_sample_rate();
        let supported = if in_range {
            supported.with_sample_rate(target)
        } else {
            supported.with_max_sample_rate()
        };
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels().max(1) as usize;
        let config: cpal::StreamConfig = supported.into();

        info!(device = %device_name, sample_rate, channels, "starting capture");

        let mut framer = Framer::new(self.buffer_size, self.hop_size);
        let mut mono = Vec::with_capacity(self.buffer_size);
        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let samples = if channels == 1 {
                        data
                    } else {
                        downmix(data, channels, &mut mono);
                        &mono[..]
                    };
                    for frame in framer.push(samples) {
                        frames.send(frame);
                    }
                },
                |err| error!(error = %err, "audio stream error"),
                None,
            )
            .context("building input stream")?;
        stream.play().context("starting input stream")?;

        Ok(CaptureHandle {
            stream: Some(stream),
            sample_rate,
            device_name,
            _lease: lease,
        })
    }
}

/// A live input stream. Capture stops when the handle is stopped or dropped.
pub struct CaptureHandle {
    stream: Option<cpal::Stream>,
    sample_rate: u32,
    device_name: String,
    _lease: CaptureLease,
}

impl CaptureHandle {
    /// Actual sample rate of the stream.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Pauses and closes the stream, releasing the microphone.
    pub fn stop(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(err) = stream.pause() {
                warn!(error = %err, "error pausing input stream");
            }
            info!(device = %self.device_name, "capture stopped");
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Averages interleaved channels into `out`.
fn downmix(data: &[f32], channels: usize, out: &mut Vec<f32>) {
    out.clear();
    out.extend(
        data.chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32),
    );
}

/// Picks the f32 input configuration closest to `target_rate`, preferring
/// mono and ranges that contain the target rate.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
        .min_by_key(|c| {
            let min = c.min_sample_rate().0;
            let max = c.max_sample_rate().0;
            let rate_miss = if (min..=max).contains(&target_rate) {
                0
            } else {
                min.abs_diff(target_rate).min(max.abs_diff(target_rate))
            };
            (rate_miss, c.channels() != 1, c.channels())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framer_overlaps_by_hop() {
        let mut framer = Framer::new(8, 2);
        let input: Vec<f32> = (0..12).map(|i| i as f32).collect();
        let frames = framer.push(&input);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0][0], 0.0);
        assert_eq!(frames[1][0], 2.0);
        assert_eq!(frames[2][..], [4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0]);

        let more = framer.push(&[12.0, 13.0]);
        assert_eq!(more.len(), 1);
        assert_eq!(more[0][0], 6.0);
    }

    #[test]
    fn framer_waits_for_a_full_buffer() {
        let mut framer = Framer::new(16, 4);
        assert!(framer.push(&[0.0; 15]).is_empty());
        assert_eq!(framer.push(&[0.0]).len(), 1);
        framer.clear();
        assert!(framer.push(&[0.0; 15]).is_empty());
    }

    #[test]
    fn full_queue_drops_the_oldest_frame() {
        let (tx, rx) = frame_channel(2);
        for i in 0..5 {
            tx.send(vec![i as f32]);
        }
        assert_eq!(tx.dropped(), 3);
        assert_eq!(rx.try_recv().unwrap(), vec![3.0]);
        assert_eq!(rx.try_recv().unwrap(), vec![4.0]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn sending_survives_a_dropped_consumer() {
        let (tx, rx) = frame_channel(1);
        drop(rx);
        tx.send(vec![0.0]);
        tx.send(vec![1.0]);
        assert_eq!(tx.dropped(), 1);
    }

    #[test]
    fn second_claim_fails_until_release() {
        let mic = Microphone::new();
        let lease = mic.lease().unwrap();
        assert!(mic.is_capturing());
        assert!(matches!(mic.lease(), Err(TunerError::AlreadyCapturing)));
        assert!(matches!(
            mic.clone().lease(),
            Err(TunerError::AlreadyCapturing)
        ));
        drop(lease);
        assert!(!mic.is_capturing());
        assert!(mic.lease().is_ok());
    }

    #[test]
    fn downmix_averages_channels() {
        let mut out = Vec::new();
        downmix(&[1.0, 0.0, 0.5, 0.5, -1.0, 1.0], 2, &mut out);
        assert_eq!(out, vec![0.5, 0.5, 0.0]);
    }
}
