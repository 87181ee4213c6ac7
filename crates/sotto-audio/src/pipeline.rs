use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::SampleFormat;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::conditioner::{ConditionerConfig, SignalConditioner};
use crate::convert;
use crate::device::{negotiate_config, DeviceManager};
use crate::format::{AudioFormat, ConditionedFrame};
use crate::watchdog::CaptureWatchdog;
use sotto_foundation::{real_clock, AudioError, SharedClock};
use sotto_telemetry::{FpsTracker, PipelineMetrics, PipelineStage};
use sotto_vad::{EnergyMeter, EnergyVad, VadConfig, VadEvent, VadProcessor};

/// Conditioned level below which a buffer counts as silent in the stats.
const SILENT_LEVEL: f32 = 0.003;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Format every conditioned frame is conformed to.
    pub target: AudioFormat,
    pub conditioner: ConditionerConfig,
    pub vad: VadConfig,
    /// Capacity of each broadcast queue; overflow drops the oldest entry.
    pub channel_capacity: usize,
    pub watchdog_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target: AudioFormat::pcm16(16_000, 1),
            conditioner: ConditionerConfig::default(),
            vad: VadConfig::default(),
            channel_capacity: 64,
            watchdog_timeout: Duration::from_secs(5),
        }
    }
}

/// Raised on every processed buffer for UI level meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelUpdate {
    pub level: f32,
    pub peak: i16,
    pub timestamp: Instant,
}

/// Capture faults surfaced to the session layer; both are fatal to the
/// current capture.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureFault {
    DeviceLost { message: String },
    Stalled { timeout: Duration },
}

#[derive(Debug, Default)]
pub struct CaptureStats {
    pub frames_captured: AtomicU64,
    pub frames_forwarded: AtomicU64,
    pub silent_frames: AtomicU64,
    pub active_frames: AtomicU64,
}

struct WorkerHandle {
    thread: JoinHandle<()>,
    shutdown: Arc<AtomicBool>,
    device_name: String,
}

/// Owns one input device at a time and runs the per-buffer chain in fixed
/// order: format conversion, conditioning, VAD. Hardware buffers arrive on
/// a dedicated `audio-capture` thread; consumers receive frames and events
/// over bounded broadcast queues that drop the oldest entry on overflow
/// rather than ever blocking the capture callback.
pub struct CapturePipeline {
    config: PipelineConfig,
    /// Guards start/stop transitions only, never buffer processing.
    control: Mutex<Option<WorkerHandle>>,
    capturing: Arc<AtomicBool>,
    fault_flag: Arc<AtomicBool>,
    level_milli: Arc<AtomicU32>,
    sensitivity_bits: Arc<AtomicU32>,
    stats: Arc<CaptureStats>,
    level_tx: broadcast::Sender<LevelUpdate>,
    activity_tx: broadcast::Sender<VadEvent>,
    frame_tx: broadcast::Sender<ConditionedFrame>,
    fault_tx: broadcast::Sender<CaptureFault>,
    metrics: Option<Arc<PipelineMetrics>>,
    clock: SharedClock,
}

impl CapturePipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let capacity = config.channel_capacity.max(1);
        let (level_tx, _) = broadcast::channel(capacity);
        let (activity_tx, _) = broadcast::channel(capacity);
        let (frame_tx, _) = broadcast::channel(capacity);
        let (fault_tx, _) = broadcast::channel(8);

        Self {
            sensitivity_bits: Arc::new(AtomicU32::new(config.vad.sensitivity.to_bits())),
            config,
            control: Mutex::new(None),
            capturing: Arc::new(AtomicBool::new(false)),
            fault_flag: Arc::new(AtomicBool::new(false)),
            level_milli: Arc::new(AtomicU32::new(0)),
            stats: Arc::new(CaptureStats::default()),
            level_tx,
            activity_tx,
            frame_tx,
            fault_tx,
            metrics: None,
            clock: real_clock(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn subscribe_levels(&self) -> broadcast::Receiver<LevelUpdate> {
        self.level_tx.subscribe()
    }

    pub fn subscribe_activity(&self) -> broadcast::Receiver<VadEvent> {
        self.activity_tx.subscribe()
    }

    pub fn subscribe_frames(&self) -> broadcast::Receiver<ConditionedFrame> {
        self.frame_tx.subscribe()
    }

    pub fn subscribe_faults(&self) -> broadcast::Receiver<CaptureFault> {
        self.fault_tx.subscribe()
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    /// Normalized level of the most recent conditioned buffer, in [0, 1].
    pub fn current_level(&self) -> f32 {
        self.level_milli.load(Ordering::Relaxed) as f32 / 1000.0
    }

    pub fn stats(&self) -> Arc<CaptureStats> {
        Arc::clone(&self.stats)
    }

    pub fn current_device(&self) -> Option<String> {
        self.control.lock().as_ref().map(|w| w.device_name.clone())
    }

    /// Adjust detector sensitivity; picked up by the capture context on the
    /// next buffer.
    pub fn set_vad_sensitivity(&self, sensitivity: f32) {
        self.sensitivity_bits
            .store(sensitivity.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    /// Open `device` (or the host default) at the negotiated hardware format
    /// and start streaming conditioned `target`-format frames.
    ///
    /// Fails with `CaptureAlreadyActive` while a capture is running rather
    /// than silently replacing the device.
    pub fn start_capture(
        &self,
        device: Option<&str>,
        target: AudioFormat,
    ) -> Result<(), AudioError> {
        let mut control = self.control.lock();
        if control.is_some() && self.capturing.load(Ordering::SeqCst) {
            return Err(AudioError::CaptureAlreadyActive);
        }
        // A worker that died on a fault leaves a stale handle; reap it.
        if let Some(stale) = control.take() {
            stale.shutdown.store(true, Ordering::SeqCst);
            let _ = stale.thread.join();
        }

        self.fault_flag.store(false, Ordering::SeqCst);
        let shutdown = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<String, AudioError>>(1);

        let worker = CaptureWorker {
            target,
            conditioner_config: self.config.conditioner,
            vad_config: self.config.vad.clone(),
            watchdog: CaptureWatchdog::new(self.config.watchdog_timeout, self.clock.clone()),
            capturing: Arc::clone(&self.capturing),
            fault_flag: Arc::clone(&self.fault_flag),
            level_milli: Arc::clone(&self.level_milli),
            sensitivity_bits: Arc::clone(&self.sensitivity_bits),
            stats: Arc::clone(&self.stats),
            level_tx: self.level_tx.clone(),
            activity_tx: self.activity_tx.clone(),
            frame_tx: self.frame_tx.clone(),
            fault_tx: self.fault_tx.clone(),
            metrics: self.metrics.clone(),
            clock: self.clock.clone(),
        };

        let requested = device.map(str::to_string);
        let worker_shutdown = Arc::clone(&shutdown);
        let thread = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || worker.run(requested, worker_shutdown, ready_tx))
            .map_err(|e| AudioError::Fatal(format!("failed to spawn capture thread: {e}")))?;

        match ready_rx.recv_timeout(Duration::from_secs(3)) {
            Ok(Ok(device_name)) => {
                *control = Some(WorkerHandle {
                    thread,
                    shutdown,
                    device_name,
                });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                shutdown.store(true, Ordering::SeqCst);
                let _ = thread.join();
                Err(AudioError::Fatal(
                    "capture thread did not become ready in time".to_string(),
                ))
            }
        }
    }

    /// Stop the active capture, releasing the device. No-op when idle.
    pub fn stop_capture(&self) {
        let handle = self.control.lock().take();
        if let Some(worker) = handle {
            worker.shutdown.store(true, Ordering::SeqCst);
            let _ = worker.thread.join();
            tracing::info!(device = %worker.device_name, "capture stopped");
        }
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop_capture();
    }
}

struct CaptureWorker {
    target: AudioFormat,
    conditioner_config: ConditionerConfig,
    vad_config: VadConfig,
    watchdog: CaptureWatchdog,
    capturing: Arc<AtomicBool>,
    fault_flag: Arc<AtomicBool>,
    level_milli: Arc<AtomicU32>,
    sensitivity_bits: Arc<AtomicU32>,
    stats: Arc<CaptureStats>,
    level_tx: broadcast::Sender<LevelUpdate>,
    activity_tx: broadcast::Sender<VadEvent>,
    frame_tx: broadcast::Sender<ConditionedFrame>,
    fault_tx: broadcast::Sender<CaptureFault>,
    metrics: Option<Arc<PipelineMetrics>>,
    clock: SharedClock,
}

impl CaptureWorker {
    fn run(
        self,
        device: Option<String>,
        shutdown: Arc<AtomicBool>,
        ready_tx: crossbeam_channel::Sender<Result<String, AudioError>>,
    ) {
        let (stream, device_name) = match self.open_stream(device.as_deref()) {
            Ok(pair) => pair,
            Err(e) => {
                let _ = ready_tx.send(Err(e));
                return;
            }
        };

        self.capturing.store(true, Ordering::SeqCst);
        self.watchdog.arm();
        let _ = ready_tx.send(Ok(device_name.clone()));
        tracing::info!(device = %device_name, "capture started");

        while !shutdown.load(Ordering::SeqCst) {
            if self.fault_flag.load(Ordering::SeqCst) {
                tracing::warn!("capture fault raised, shutting stream down");
                break;
            }
            if self.watchdog.check() {
                if let Some(m) = &self.metrics {
                    m.capture_errors.fetch_add(1, Ordering::Relaxed);
                }
                let _ = self.fault_tx.send(CaptureFault::Stalled {
                    timeout: self.watchdog.timeout(),
                });
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }

        drop(stream);
        self.watchdog.disarm();
        self.capturing.store(false, Ordering::SeqCst);
        tracing::info!(device = %device_name, "capture thread exiting");
    }

    fn open_stream(&self, device: Option<&str>) -> Result<(cpal::Stream, String), AudioError> {
        let manager = DeviceManager::new()?;
        let handle = manager.open_device(device)?;
        let device_name = handle.name().unwrap_or_else(|_| "<unknown>".to_string());
        let (config, sample_format) = negotiate_config(&handle)?;

        let source = AudioFormat::pcm16(config.sample_rate.0, config.channels);
        tracing::info!(
            device = %device_name,
            source_rate = source.sample_rate,
            source_channels = source.channels,
            target_rate = self.target.sample_rate,
            "negotiated capture format"
        );

        let mut processor = FrameProcessor::new(
            source,
            self.target,
            self.conditioner_config,
            self.vad_config.clone(),
            Arc::clone(&self.sensitivity_bits),
            Arc::clone(&self.level_milli),
            Arc::clone(&self.stats),
            Some(self.watchdog.clone()),
            self.level_tx.clone(),
            self.activity_tx.clone(),
            self.frame_tx.clone(),
            self.metrics.clone(),
            self.clock.clone(),
        );

        let fault_flag = Arc::clone(&self.fault_flag);
        let fault_tx = self.fault_tx.clone();
        let err_fn = move |err: cpal::StreamError| {
            tracing::error!("audio stream error: {err}");
            let _ = fault_tx.send(CaptureFault::DeviceLost {
                message: err.to_string(),
            });
            fault_flag.store(true, Ordering::SeqCst);
        };

        // Scratch space so non-i16 callbacks never allocate per buffer.
        thread_local! {
            static CONVERT_BUFFER: RefCell<Vec<i16>> = const { RefCell::new(Vec::new()) };
        }

        let stream = match sample_format {
            SampleFormat::I16 => handle.build_input_stream(
                &config,
                move |data: &[i16], _: &_| {
                    processor.ingest(data);
                },
                err_fn,
                None,
            )?,
            SampleFormat::F32 => handle.build_input_stream(
                &config,
                move |data: &[f32], _: &_| {
                    CONVERT_BUFFER.with(|buf| {
                        let mut converted = buf.borrow_mut();
                        converted.clear();
                        converted.reserve(data.len());
                        for &s in data {
                            let clamped = s.clamp(-1.0, 1.0);
                            converted.push((clamped * 32767.0).round() as i16);
                        }
                        processor.ingest(&converted);
                    });
                },
                err_fn,
                None,
            )?,
            SampleFormat::U16 => handle.build_input_stream(
                &config,
                move |data: &[u16], _: &_| {
                    CONVERT_BUFFER.with(|buf| {
                        let mut converted = buf.borrow_mut();
                        converted.clear();
                        converted.reserve(data.len());
                        for &s in data {
                            converted.push((s as i32 - 32_768) as i16);
                        }
                        processor.ingest(&converted);
                    });
                },
                err_fn,
                None,
            )?,
            SampleFormat::F64 => handle.build_input_stream(
                &config,
                move |data: &[f64], _: &_| {
                    CONVERT_BUFFER.with(|buf| {
                        let mut converted = buf.borrow_mut();
                        converted.clear();
                        converted.reserve(data.len());
                        for &s in data {
                            let clamped = s.clamp(-1.0, 1.0);
                            converted.push((clamped * 32767.0).round() as i16);
                        }
                        processor.ingest(&converted);
                    });
                },
                err_fn,
                None,
            )?,
            other => {
                return Err(AudioError::FormatUnsupported {
                    details: format!("{other:?}"),
                });
            }
        };

        stream.play()?;
        Ok((stream, device_name))
    }
}

/// The per-buffer chain, in fixed order: conform to the target format,
/// condition, meter, detect. Runs in the capture context, so every step is
/// bounded and allocation-light.
struct FrameProcessor {
    source: AudioFormat,
    target: AudioFormat,
    conditioner: SignalConditioner,
    vad: EnergyVad,
    meter: EnergyMeter,
    sensitivity_bits: Arc<AtomicU32>,
    level_milli: Arc<AtomicU32>,
    stats: Arc<CaptureStats>,
    watchdog: Option<CaptureWatchdog>,
    level_tx: broadcast::Sender<LevelUpdate>,
    activity_tx: broadcast::Sender<VadEvent>,
    frame_tx: broadcast::Sender<ConditionedFrame>,
    metrics: Option<Arc<PipelineMetrics>>,
    fps: FpsTracker,
    clock: SharedClock,
}

impl FrameProcessor {
    #[allow(clippy::too_many_arguments)]
    fn new(
        source: AudioFormat,
        target: AudioFormat,
        conditioner_config: ConditionerConfig,
        mut vad_config: VadConfig,
        sensitivity_bits: Arc<AtomicU32>,
        level_milli: Arc<AtomicU32>,
        stats: Arc<CaptureStats>,
        watchdog: Option<CaptureWatchdog>,
        level_tx: broadcast::Sender<LevelUpdate>,
        activity_tx: broadcast::Sender<VadEvent>,
        frame_tx: broadcast::Sender<ConditionedFrame>,
        metrics: Option<Arc<PipelineMetrics>>,
        clock: SharedClock,
    ) -> Self {
        // The detector sees conditioned frames, which are at the target rate.
        vad_config.sample_rate_hz = target.sample_rate;
        Self {
            source,
            target,
            conditioner: SignalConditioner::new(conditioner_config),
            vad: EnergyVad::new(vad_config),
            meter: EnergyMeter::new(),
            sensitivity_bits,
            level_milli,
            stats,
            watchdog,
            level_tx,
            activity_tx,
            frame_tx,
            metrics,
            fps: FpsTracker::new(),
            clock,
        }
    }

    fn ingest(&mut self, samples: &[i16]) {
        if samples.is_empty() {
            return;
        }
        if let Some(dog) = &self.watchdog {
            dog.feed();
        }
        let now = self.clock.now();
        self.stats.frames_captured.fetch_add(1, Ordering::Relaxed);
        if let Some(m) = &self.metrics {
            m.increment_captured();
            m.mark_stage_active(PipelineStage::Capture);
            if let Some(fps) = self.fps.tick() {
                m.update_capture_fps(fps);
            }
        }

        // 1. Format conversion
        let conformed = if self.source.sample_rate != self.target.sample_rate
            || self.source.channels != self.target.channels
        {
            convert::conform(samples, self.source, self.target)
        } else {
            samples.to_vec()
        };
        if let Some(m) = &self.metrics {
            m.mark_stage_active(PipelineStage::Convert);
        }

        // 2. Noise/level conditioning
        let conditioned = self.conditioner.condition(&conformed);
        if let Some(m) = &self.metrics {
            m.mark_stage_active(PipelineStage::Condition);
        }

        // 3. Level signal, raised on every buffer
        let level = self.meter.rms(&conditioned).clamp(0.0, 1.0);
        self.level_milli
            .store((level * 1000.0) as u32, Ordering::Relaxed);
        let peak = conditioned
            .iter()
            .map(|s| s.saturating_abs())
            .max()
            .unwrap_or(0);
        if level < SILENT_LEVEL {
            self.stats.silent_frames.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.active_frames.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(m) = &self.metrics {
            m.update_audio_level(&conditioned);
        }
        let _ = self.level_tx.send(LevelUpdate {
            level,
            peak,
            timestamp: now,
        });

        // 4. VAD, raised only on transitions
        let sensitivity = f32::from_bits(self.sensitivity_bits.load(Ordering::Relaxed));
        if (sensitivity - self.vad.sensitivity()).abs() > f32::EPSILON {
            self.vad.set_sensitivity(sensitivity);
        }
        let window = self.vad.config().frame_size_samples.max(1);
        for chunk in conditioned.chunks(window) {
            // Bounded window sizes cannot fail detection.
            if let Ok(Some(event)) = VadProcessor::process(&mut self.vad, chunk) {
                if let Some(m) = &self.metrics {
                    m.set_speaking(matches!(event, VadEvent::SpeechStart { .. }));
                }
                let _ = self.activity_tx.send(event);
            }
        }
        if let Some(m) = &self.metrics {
            m.mark_stage_active(PipelineStage::Vad);
        }

        // 5. Hand the conditioned frame to consumers
        let frame = ConditionedFrame {
            samples: conditioned.into(),
            sample_rate: self.target.sample_rate,
            timestamp: now,
        };
        match self.frame_tx.send(frame) {
            Ok(_) => {
                self.stats.frames_forwarded.fetch_add(1, Ordering::Relaxed);
                if let Some(m) = &self.metrics {
                    m.increment_conditioned();
                    m.mark_stage_active(PipelineStage::Output);
                }
            }
            Err(_) => {
                tracing::trace!("no consumers subscribed for conditioned frames");
            }
        }
    }
}
