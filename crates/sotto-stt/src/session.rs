//! Recognition session state machine
//!
//! Composes the capture pipeline, VAD signals, and an injected recognition
//! engine into the listen/stop/cancel contract:
//!
//! Ready -> Listening -> Processing -> {Completed | Failed | Cancelled | TimedOut}
//!
//! Every terminal transition releases the capture device, even when the
//! engine misbehaves. Invalid calls are rejected synchronously without
//! mutating state.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::types::{EngineConfig, TranscriptionEvent};
use crate::{next_session_id, RecognitionEngine};
use sotto_audio::{AudioFormat, CaptureFault, CapturePipeline, ConditionedFrame};
use sotto_foundation::{AudioError, ProfileSettings, SessionError};
use sotto_telemetry::PipelineMetrics;
use sotto_vad::VadEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Ready,
    Listening,
    Processing,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed
                | SessionState::Failed
                | SessionState::Cancelled
                | SessionState::TimedOut
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Ready => "Ready",
            SessionState::Listening => "Listening",
            SessionState::Processing => "Processing",
            SessionState::Completed => "Completed",
            SessionState::Failed => "Failed",
            SessionState::Cancelled => "Cancelled",
            SessionState::TimedOut => "TimedOut",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One observable state change, including the human-readable reason for
/// terminal failures. The UI layer sees these and nothing lower-level.
#[derive(Debug, Clone)]
pub struct SessionTransition {
    pub session_id: u64,
    pub from: SessionState,
    pub to: SessionState,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub engine: EngineConfig,
    /// Format conditioned frames are delivered in.
    pub target_format: AudioFormat,
    /// Bound on the Processing phase; exceeding it yields TimedOut, which is
    /// deliberately distinct from Failed so retry logic can tell "engine too
    /// slow" from "engine errored".
    pub processing_timeout: Duration,
    /// End audio intake when the detector reports sustained silence.
    pub auto_stop_on_silence: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            target_format: AudioFormat::pcm16(16_000, 1),
            processing_timeout: Duration::from_secs(10),
            auto_stop_on_silence: true,
        }
    }
}

/// The slice of the capture pipeline a session needs. `CapturePipeline`
/// implements it directly; tests substitute a scripted fake.
pub trait CaptureControl: Send + Sync {
    fn begin(&self, device: Option<&str>, target: AudioFormat) -> Result<(), AudioError>;
    fn end(&self);
    fn frames(&self) -> broadcast::Receiver<ConditionedFrame>;
    fn activity(&self) -> broadcast::Receiver<VadEvent>;
    fn faults(&self) -> broadcast::Receiver<CaptureFault>;
    fn set_vad_sensitivity(&self, sensitivity: f32);
}

impl CaptureControl for CapturePipeline {
    fn begin(&self, device: Option<&str>, target: AudioFormat) -> Result<(), AudioError> {
        self.start_capture(device, target)
    }

    fn end(&self) {
        self.stop_capture()
    }

    fn frames(&self) -> broadcast::Receiver<ConditionedFrame> {
        self.subscribe_frames()
    }

    fn activity(&self) -> broadcast::Receiver<VadEvent> {
        self.subscribe_activity()
    }

    fn faults(&self) -> broadcast::Receiver<CaptureFault> {
        self.subscribe_faults()
    }

    fn set_vad_sensitivity(&self, sensitivity: f32) {
        CapturePipeline::set_vad_sensitivity(self, sensitivity)
    }
}

enum SessionCommand {
    Stop,
    Cancel,
}

struct SessionShared {
    state: RwLock<SessionState>,
    session_id: AtomicU64,
    device: RwLock<Option<String>>,
    format: RwLock<AudioFormat>,
    transcript: RwLock<String>,
    transition_tx: crossbeam_channel::Sender<SessionTransition>,
    transition_rx: crossbeam_channel::Receiver<SessionTransition>,
}

impl SessionShared {
    fn new() -> Self {
        let (transition_tx, transition_rx) = crossbeam_channel::unbounded();
        Self {
            state: RwLock::new(SessionState::Ready),
            session_id: AtomicU64::new(0),
            device: RwLock::new(None),
            format: RwLock::new(AudioFormat::pcm16(16_000, 1)),
            transcript: RwLock::new(String::new()),
            transition_tx,
            transition_rx,
        }
    }

    /// Validated transition; invalid requests leave state untouched.
    fn transition(&self, to: SessionState, reason: Option<String>) -> Result<(), SessionError> {
        let mut current = self.state.write();

        let valid = matches!(
            (*current, to),
            (SessionState::Ready, SessionState::Listening)
                | (SessionState::Ready, SessionState::Cancelled)
                | (SessionState::Listening, SessionState::Processing)
                | (SessionState::Listening, SessionState::Cancelled)
                | (SessionState::Listening, SessionState::Failed)
                | (SessionState::Processing, SessionState::Completed)
                | (SessionState::Processing, SessionState::Failed)
                | (SessionState::Processing, SessionState::Cancelled)
                | (SessionState::Processing, SessionState::TimedOut)
                | (SessionState::Completed, SessionState::Ready)
                | (SessionState::Failed, SessionState::Ready)
                | (SessionState::Cancelled, SessionState::Ready)
                | (SessionState::TimedOut, SessionState::Ready)
        );

        if !valid {
            return Err(SessionError::InvalidTransition {
                from: current.name().to_string(),
                to: to.name().to_string(),
            });
        }

        let from = *current;
        info!(
            session_id = self.session_id.load(Ordering::Relaxed),
            %from,
            %to,
            reason = reason.as_deref().unwrap_or(""),
            "session transition"
        );
        *current = to;
        let _ = self.transition_tx.send(SessionTransition {
            session_id: self.session_id.load(Ordering::Relaxed),
            from,
            to,
            reason,
        });
        Ok(())
    }
}

/// Drives recognition sessions over an injected engine.
///
/// One session at a time: `start` is valid from Ready only; a finished
/// session is recycled with `reset`.
pub struct SessionController<E: RecognitionEngine + 'static> {
    capture: Arc<dyn CaptureControl>,
    engine: Arc<tokio::sync::Mutex<E>>,
    config: SessionConfig,
    shared: Arc<SessionShared>,
    event_tx: broadcast::Sender<TranscriptionEvent>,
    command_tx: Mutex<Option<mpsc::Sender<SessionCommand>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    /// Serializes start attempts; the narrow state lock alone cannot span
    /// the capture handshake.
    start_guard: Mutex<()>,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl<E: RecognitionEngine + 'static> SessionController<E> {
    pub fn new(capture: Arc<dyn CaptureControl>, engine: E, config: SessionConfig) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            capture,
            engine: Arc::new(tokio::sync::Mutex::new(engine)),
            config,
            shared: Arc::new(SessionShared::new()),
            event_tx,
            command_tx: Mutex::new(None),
            task: Mutex::new(None),
            start_guard: Mutex::new(()),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.read()
    }

    pub fn session_id(&self) -> u64 {
        self.shared.session_id.load(Ordering::Relaxed)
    }

    /// Latest partial (or final) transcript text for the current session.
    pub fn transcript(&self) -> String {
        self.shared.transcript.read().clone()
    }

    pub fn device(&self) -> Option<String> {
        self.shared.device.read().clone()
    }

    /// Audio format the current session captures at.
    pub fn format(&self) -> AudioFormat {
        *self.shared.format.read()
    }

    /// Synchronous subscription for UI consumers; every transition carries
    /// its reason.
    pub fn subscribe_transitions(&self) -> crossbeam_channel::Receiver<SessionTransition> {
        self.shared.transition_rx.clone()
    }

    /// Engine partial/final events, re-emitted unchanged.
    pub fn subscribe_events(&self) -> broadcast::Receiver<TranscriptionEvent> {
        self.event_tx.subscribe()
    }

    /// Begin listening on `device` (or the host default). Valid from Ready
    /// only; rejected synchronously otherwise, without touching state.
    pub async fn start(&self, device: Option<&str>) -> Result<u64, SessionError> {
        self.start_with_format(device, self.config.target_format)
            .await
    }

    /// Apply profile preferences (device, format, VAD sensitivity) and start.
    pub async fn start_with_profile(&self, profile: &ProfileSettings) -> Result<u64, SessionError> {
        self.capture.set_vad_sensitivity(profile.vad_sensitivity);
        let target = AudioFormat::pcm16(profile.sample_rate_hz, profile.channels);
        self.start_with_format(profile.preferred_device.as_deref(), target)
            .await
    }

    async fn start_with_format(
        &self,
        device: Option<&str>,
        target: AudioFormat,
    ) -> Result<u64, SessionError> {
        let _guard = self.start_guard.lock();

        {
            let state = self.shared.state.read();
            if *state != SessionState::Ready {
                return Err(SessionError::InvalidTransition {
                    from: state.name().to_string(),
                    to: SessionState::Listening.name().to_string(),
                });
            }
        }

        // Subscribe before the stream starts so no frame is missed.
        let frames = self.capture.frames();
        let activity = self.capture.activity();
        let faults = self.capture.faults();

        self.capture.begin(device, target)?;

        let id = next_session_id();
        self.shared.session_id.store(id, Ordering::SeqCst);
        *self.shared.device.write() = device.map(str::to_string);
        *self.shared.format.write() = target;
        self.shared.transcript.write().clear();
        self.shared.transition(SessionState::Listening, None)?;

        let (command_tx, command_rx) = mpsc::channel(8);
        *self.command_tx.lock() = Some(command_tx);

        let worker = SessionWorker {
            capture: Arc::clone(&self.capture),
            engine: Arc::clone(&self.engine),
            shared: Arc::clone(&self.shared),
            event_tx: self.event_tx.clone(),
            config: self.config.clone(),
            metrics: self.metrics.clone(),
        };
        let handle = tokio::spawn(worker.run(frames, activity, faults, command_rx));
        *self.task.lock() = Some(handle);

        Ok(id)
    }

    /// Explicit end-of-audio: Listening moves to Processing; the engine may
    /// still finish. Valid from Listening (Processing is a no-op).
    pub fn stop(&self) -> Result<(), SessionError> {
        match self.state() {
            SessionState::Listening => {
                if let Some(tx) = self.command_tx.lock().as_ref() {
                    let _ = tx.try_send(SessionCommand::Stop);
                }
                Ok(())
            }
            SessionState::Processing => Ok(()),
            other => Err(SessionError::InvalidTransition {
                from: other.name().to_string(),
                to: SessionState::Processing.name().to_string(),
            }),
        }
    }

    /// Cancel the session. Always succeeds: terminal sessions are a no-op,
    /// active ones stop capture immediately and abandon engine work.
    pub fn cancel(&self) -> Result<(), SessionError> {
        let state = self.state();
        if state.is_terminal() {
            return Ok(());
        }
        if state == SessionState::Ready {
            return self
                .shared
                .transition(SessionState::Cancelled, Some("cancelled before listening".into()));
        }
        if let Some(tx) = self.command_tx.lock().as_ref() {
            let _ = tx.try_send(SessionCommand::Cancel);
        }
        Ok(())
    }

    /// Recycle a finished session back to Ready.
    pub fn reset(&self) -> Result<(), SessionError> {
        self.shared.transition(SessionState::Ready, None)?;
        *self.task.lock() = None;
        *self.command_tx.lock() = None;
        Ok(())
    }
}

struct SessionWorker<E: RecognitionEngine + 'static> {
    capture: Arc<dyn CaptureControl>,
    engine: Arc<tokio::sync::Mutex<E>>,
    shared: Arc<SessionShared>,
    event_tx: broadcast::Sender<TranscriptionEvent>,
    config: SessionConfig,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl<E: RecognitionEngine + 'static> SessionWorker<E> {
    async fn run(
        self,
        mut frames: broadcast::Receiver<ConditionedFrame>,
        mut activity: broadcast::Receiver<VadEvent>,
        mut faults: broadcast::Receiver<CaptureFault>,
        mut commands: mpsc::Receiver<SessionCommand>,
    ) {
        let mut engine = self.engine.lock().await;

        if let Err(e) = engine.begin_utterance(&self.config.engine).await {
            self.capture.end();
            let _ = self.shared.transition(
                SessionState::Failed,
                Some(format!("engine failed to start: {}", e.message)),
            );
            return;
        }

        loop {
            tokio::select! {
                biased;

                cmd = commands.recv() => match cmd {
                    Some(SessionCommand::Cancel) => {
                        engine.abort().await;
                        self.capture.end();
                        let _ = self.shared.transition(SessionState::Cancelled, None);
                        return;
                    }
                    // Stop, or the controller went away entirely
                    Some(SessionCommand::Stop) | None => break,
                },

                fault = faults.recv() => {
                    if let Ok(fault) = fault {
                        engine.abort().await;
                        self.capture.end();
                        let reason = match fault {
                            CaptureFault::DeviceLost { message } => {
                                format!("device unavailable: {message}")
                            }
                            CaptureFault::Stalled { timeout } => {
                                format!("no audio data for {timeout:?}")
                            }
                        };
                        let _ = self.shared.transition(SessionState::Failed, Some(reason));
                        return;
                    }
                },

                event = activity.recv() => {
                    if let Ok(VadEvent::SpeechEnd { duration_ms, .. }) = event {
                        if self.config.auto_stop_on_silence {
                            info!(duration_ms, "silence after speech, ending audio intake");
                            break;
                        }
                    }
                },

                frame = frames.recv() => match frame {
                    Ok(frame) => match engine.accept_frame(&frame.samples).await {
                        Ok(Some(event)) => self.publish(event),
                        Ok(None) => {}
                        Err(e) if e.recoverable => {
                            warn!("engine dropped a frame: {}", e.message);
                        }
                        Err(e) => {
                            engine.abort().await;
                            self.capture.end();
                            let _ = self.shared.transition(
                                SessionState::Failed,
                                Some(format!("engine failed: {}", e.message)),
                            );
                            return;
                        }
                    },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(dropped = n, "conditioned frames dropped, consumer lagging");
                        if let Some(m) = &self.metrics {
                            m.add_dropped(n);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        engine.abort().await;
                        self.capture.end();
                        let _ = self.shared.transition(
                            SessionState::Failed,
                            Some("capture channel closed".to_string()),
                        );
                        return;
                    }
                },
            }
        }

        // End of audio: no further frames are accepted, the engine drains.
        let _ = self.shared.transition(SessionState::Processing, None);
        self.capture.end();

        match tokio::time::timeout(self.config.processing_timeout, engine.finalize()).await {
            Ok(Ok(event)) => {
                if let Some(event) = event {
                    self.publish(event);
                }
                let _ = self.shared.transition(SessionState::Completed, None);
            }
            Ok(Err(e)) => {
                let _ = self.shared.transition(
                    SessionState::Failed,
                    Some(format!("engine failed: {}", e.message)),
                );
            }
            Err(_) => {
                engine.abort().await;
                let _ = self.shared.transition(
                    SessionState::TimedOut,
                    Some(format!(
                        "processing exceeded {:?}",
                        self.config.processing_timeout
                    )),
                );
            }
        }
    }

    fn publish(&self, event: TranscriptionEvent) {
        *self.shared.transcript.write() = event.text().to_string();
        let _ = self.event_tx.send(event);
    }
}
