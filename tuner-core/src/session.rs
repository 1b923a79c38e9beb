//! Listening session: the processing thread around a [`TunerPipeline`].
//!
//! The thread owns the pipeline outright. Buffers arrive on one channel and
//! commands (reset, new settings, string selection, stop) on another, so all
//! pipeline state changes happen on the processing thread in arrival order.
//! Each processed frame replaces the published snapshot as a whole; readers
//! clone an `Arc` and never see a partially updated frame.

use crossbeam_channel::{select, Receiver, Sender, TrySendError};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::TunerConfig;
use crate::error::{Result, TunerError};
use crate::pipeline::{TunerFrame, TunerPipeline};

/// Messages for the processing thread.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    /// Clear all smoothing and hold state.
    Reset,
    /// Apply new settings.
    UpdateConfig(TunerConfig),
    /// Target a string, or `None` for nearest-string matching.
    SelectString(Option<usize>),
    /// Leave the processing loop.
    Stop,
}

type Snapshot = Arc<RwLock<Option<Arc<TunerFrame>>>>;

/// A running processing thread.
pub struct ListeningSession {
    commands: Sender<SessionCommand>,
    snapshot: Snapshot,
    listening: Arc<AtomicBool>,
    updates: Receiver<Arc<TunerFrame>>,
    worker: Option<JoinHandle<()>>,
}

impl ListeningSession {
    /// Spawns the processing thread, consuming buffers from `buffers` until
    /// the channel closes or the session is stopped.
    pub fn spawn(pipeline: TunerPipeline, buffers: Receiver<Vec<f32>>) -> Result<Self> {
        let (commands, command_rx) = crossbeam_channel::unbounded();
        let (update_tx, updates) = crossbeam_channel::bounded(1);
        let snapshot: Snapshot = Arc::new(RwLock::new(None));
        let listening = Arc::new(AtomicBool::new(true));

        let worker = {
            let snapshot = Arc::clone(&snapshot);
            let listening = Arc::clone(&listening);
            let publish = (update_tx, updates.clone());
            thread::Builder::new()
                .name("tuner-processing".into())
                .spawn(move || run(pipeline, buffers, command_rx, snapshot, listening, publish))
                .map_err(|e| TunerError::Stream(format!("spawning processing thread: {e}")))?
        };

        info!("listening session started");
        Ok(Self {
            commands,
            snapshot,
            listening,
            updates,
            worker: Some(worker),
        })
    }

    /// The latest published frame.
    pub fn snapshot(&self) -> Option<Arc<TunerFrame>> {
        self.snapshot
            .read()
            .map(|guard| Option::clone(&guard))
            .unwrap_or_else(|poisoned| Option::clone(&poisoned.into_inner()))
    }

    /// Receives published frames. Only the newest unread frame is kept.
    pub fn updates(&self) -> &Receiver<Arc<TunerFrame>> {
        &self.updates
    }

    /// True until the session stops or its input ends.
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Acquire)
    }

    /// Clears the pipeline state.
    pub fn reset(&self) -> Result<()> {
        self.send(SessionCommand::Reset)
    }

    /// Applies new settings.
    pub fn update_config(&self, config: TunerConfig) -> Result<()> {
        config.validate()?;
        self.send(SessionCommand::UpdateConfig(config))
    }

    /// Targets a string.
    pub fn select_string(&self, index: Option<usize>) -> Result<()> {
        self.send(SessionCommand::SelectString(index))
    }

    /// Stops publishing and waits for the thread to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| TunerError::SessionClosed)
    }

    fn shutdown(&mut self) {
        self.listening.store(false, Ordering::Release);
        let _ = self.commands.send(SessionCommand::Stop);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("processing thread panicked");
            }
            info!("listening session stopped");
        }
    }
}

impl Drop for ListeningSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(
    mut pipeline: TunerPipeline,
    buffers: Receiver<Vec<f32>>,
    commands: Receiver<SessionCommand>,
    snapshot: Snapshot,
    listening: Arc<AtomicBool>,
    (updates, unread): (Sender<Arc<TunerFrame>>, Receiver<Arc<TunerFrame>>),
) {
    let started = Instant::now();
    loop {
        select! {
            recv(commands) -> command => match command {
                Ok(SessionCommand::Reset) => pipeline.reset(),
                Ok(SessionCommand::UpdateConfig(config)) => {
                    if let Err(err) = pipeline.update_config(config) {
                        warn!(error = %err, "rejected config update");
                    }
                }
                Ok(SessionCommand::SelectString(index)) => {
                    if let Err(err) = pipeline.select_string(index) {
                        warn!(error = %err, "rejected string selection");
                    }
                }
                Ok(SessionCommand::Stop) | Err(_) => break,
            },
            recv(buffers) -> samples => match samples {
                Ok(samples) => {
                    let timestamp_ms = started.elapsed().as_millis() as u64;
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                        pipeline.process_buffer(&samples, timestamp_ms)
                    }));
                    match outcome {
                        Ok(Some(frame)) => {
                            if !listening.load(Ordering::Acquire) {
                                continue;
                            }
                            let frame = Arc::new(frame);
                            match snapshot.write() {
                                Ok(mut guard) => *guard = Some(Arc::clone(&frame)),
                                Err(poisoned) => *poisoned.into_inner() = Some(Arc::clone(&frame)),
                            }
                            // Replace an unread frame rather than queue behind it.
                            if let Err(TrySendError::Full(frame)) = updates.try_send(frame) {
                                let _ = unread.try_recv();
                                let _ = updates.try_send(frame);
                            }
                        }
                        Ok(None) => {}
                        Err(_) => {
                            error!("pipeline panicked on a buffer, resetting");
                            pipeline.reset();
                        }
                    }
                }
                Err(_) => {
                    debug!("buffer channel closed");
                    break;
                }
            },
        }
    }
    listening.store(false, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sine(freq: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / 44_100.0).sin())
            .collect()
    }

    fn yin_only() -> TunerConfig {
        TunerConfig {
            secondary_estimator: false,
            chord_detection: false,
            ..TunerConfig::default()
        }
    }

    #[test]
    fn publishes_frames_and_stops() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let session = ListeningSession::spawn(TunerPipeline::new(yin_only()).unwrap(), rx).unwrap();
        tx.send(sine(440.0, 4096)).unwrap();

        let frame = session
            .updates()
            .recv_timeout(Duration::from_secs(5))
            .expect("frame published");
        assert_eq!(frame.note_label(), "A4");
        assert_eq!(session.snapshot().unwrap().note_label(), "A4");
        assert!(session.is_listening());
        session.stop();
    }

    #[test]
    fn malformed_buffers_are_skipped() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let session = ListeningSession::spawn(TunerPipeline::new(yin_only()).unwrap(), rx).unwrap();
        tx.send(vec![0.0; 1000]).unwrap();
        tx.send(sine(261.63, 4096)).unwrap();
        let frame = session
            .updates()
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        assert_eq!(frame.frame_index, 0);
        assert_eq!(frame.note_label(), "C4");
    }

    #[test]
    fn ends_when_input_closes() {
        let (tx, rx) = crossbeam_channel::unbounded::<Vec<f32>>();
        let session = ListeningSession::spawn(TunerPipeline::new(yin_only()).unwrap(), rx).unwrap();
        drop(tx);
        let deadline = Instant::now() + Duration::from_secs(5);
        let finished = |s: &ListeningSession| s.worker.as_ref().is_none_or(|w| w.is_finished());
        while !finished(&session) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!session.is_listening());
        assert!(session.reset().is_err());
    }

    #[test]
    fn invalid_config_is_rejected_before_sending() {
        let (_tx, rx) = crossbeam_channel::unbounded::<Vec<f32>>();
        let session = ListeningSession::spawn(TunerPipeline::new(yin_only()).unwrap(), rx).unwrap();
        let mut config = yin_only();
        config.sensitivity = 100.0;
        assert!(matches!(
            session.update_config(config),
            Err(TunerError::Config(_))
        ));
    }
}
