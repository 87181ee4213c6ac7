use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::device::{AudioDevice, DeviceManager};
use sotto_foundation::AudioError;

/// Device-changed notifications for hotplug handling.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceChange {
    Added { name: String },
    Removed { name: String },
    DefaultChanged { name: String },
    StateChanged { name: String, enabled: bool },
}

/// A device must be absent this many consecutive scans before `Removed`
/// fires; single-scan flicker from slow enumeration is common on hotplug.
const REMOVAL_DEBOUNCE_SCANS: u32 = 2;

/// Background watcher diffing device enumerations at a fixed interval and
/// broadcasting changes so capture sessions fail fast on a dead handle.
pub struct DeviceMonitor {
    manager: DeviceManager,
    event_tx: broadcast::Sender<DeviceChange>,
    interval: Duration,
    known: HashMap<String, AudioDevice>,
    missing_scans: HashMap<String, u32>,
    last_default: Option<String>,
}

impl DeviceMonitor {
    pub fn new(
        interval: Duration,
    ) -> Result<(Self, broadcast::Receiver<DeviceChange>), AudioError> {
        let manager = DeviceManager::new()?;
        let (event_tx, event_rx) = broadcast::channel(32);

        Ok((
            Self {
                manager,
                event_tx,
                interval,
                known: HashMap::new(),
                missing_scans: HashMap::new(),
                last_default: None,
            },
            event_rx,
        ))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeviceChange> {
        self.event_tx.subscribe()
    }

    /// Run the scan loop on a dedicated thread until `running` clears.
    pub fn start(mut self, running: Arc<AtomicBool>) -> JoinHandle<()> {
        thread::Builder::new()
            .name("device-monitor".to_string())
            .spawn(move || {
                info!("device monitor started");
                self.scan();

                while running.load(Ordering::Relaxed) {
                    thread::sleep(self.interval);
                    self.scan();
                }

                info!("device monitor stopping");
            })
            .expect("failed to spawn device monitor thread")
    }

    fn scan(&mut self) {
        let current = self.manager.list_input_devices();
        let mut fresh: HashMap<String, AudioDevice> = HashMap::new();

        for device in current {
            let name = device.name.clone();

            match self.known.get(&name) {
                None => {
                    debug!(device = %name, "new input device");
                    let _ = self.event_tx.send(DeviceChange::Added { name: name.clone() });
                }
                Some(previous) if previous.is_enabled != device.is_enabled => {
                    let _ = self.event_tx.send(DeviceChange::StateChanged {
                        name: name.clone(),
                        enabled: device.is_enabled,
                    });
                }
                _ => {}
            }

            self.missing_scans.remove(&name);
            fresh.insert(name, device);
        }

        for name in self.known.keys() {
            if !fresh.contains_key(name) {
                let count = self.missing_scans.entry(name.clone()).or_insert(0);
                *count += 1;
                debug!(device = %name, scans = *count, "device missing from scan");

                if *count >= REMOVAL_DEBOUNCE_SCANS {
                    warn!(device = %name, "input device removed");
                    let _ = self
                        .event_tx
                        .send(DeviceChange::Removed { name: name.clone() });
                    self.missing_scans.remove(name);
                } else {
                    // Keep it around until the debounce expires
                    fresh.insert(name.clone(), self.known[name].clone());
                }
            }
        }

        let current_default = fresh
            .values()
            .find(|d| d.is_default)
            .map(|d| d.name.clone());
        if current_default != self.last_default {
            if let Some(name) = &current_default {
                info!(device = %name, "default input device changed");
                let _ = self
                    .event_tx
                    .send(DeviceChange::DefaultChanged { name: name.clone() });
            }
            self.last_default = current_default;
        }

        self.known = fresh;
    }
}
