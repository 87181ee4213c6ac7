pub mod conditioner;
pub mod convert;
pub mod device;
pub mod format;
pub mod monitor;
pub mod pipeline;
pub mod watchdog;

// Public API
pub use conditioner::{ConditionerConfig, SignalConditioner};
pub use device::{AudioDevice, DeviceManager};
pub use format::{AudioFormat, CaptureBuffer, ConditionedFrame, SampleEncoding};
pub use monitor::{DeviceChange, DeviceMonitor};
pub use pipeline::{
    CaptureFault, CapturePipeline, CaptureStats, LevelUpdate, PipelineConfig,
};
pub use watchdog::CaptureWatchdog;
