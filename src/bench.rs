use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::error::EngineError;

/// A device under test. Drivers (adb, serial, fastboot) live outside this
/// crate; the engine only needs a name, a command channel, and a log
/// stream for watchers.
pub trait Device: Send + Sync {
    fn name(&self) -> &str;

    /// Run a shell command on the device and return its output.
    ///
    /// # Errors
    ///
    /// Returns a device-kind error when the device misbehaves.
    fn run_command(&self, command: &str) -> Result<String, EngineError>;

    /// Lines captured from the device log since the last call.
    fn drain_log(&self) -> Vec<String>;
}

/// A piece of lab equipment (power supply, attenuator, chamber).
pub trait Equipment: Send + Sync {
    fn name(&self) -> &str;

    /// Release the equipment. Called once at campaign teardown.
    fn release(&self);
}

/// The injected factory through which steps obtain devices and equipment.
///
/// Handles are singletons: the first request for a name acquires the
/// resource, later requests return the same handle, and `release_all`
/// drops everything at campaign teardown.
pub trait BenchFactory: Send + Sync {
    /// # Errors
    ///
    /// Returns an environment- or device-kind error when acquisition fails.
    fn device(&self, name: &str) -> Result<Arc<dyn Device>, EngineError>;

    /// # Errors
    ///
    /// Returns an equipment-kind error when acquisition fails.
    fn equipment(&self, name: &str) -> Result<Arc<dyn Equipment>, EngineError>;

    fn release_all(&self);
}

/// An in-memory bench with no real hardware behind it.
///
/// Devices accept every command and echo it back; equipment is inert.
/// Used by `validate` (which must not touch hardware) and by the test
/// suites.
#[derive(Default)]
pub struct NullBench {
    devices: Mutex<BTreeMap<String, Arc<NullDevice>>>,
    equipment: Mutex<BTreeMap<String, Arc<NullEquipment>>>,
}

impl NullBench {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to use as `Arc<dyn BenchFactory>`.
    pub fn shared() -> Arc<dyn BenchFactory> {
        Arc::new(Self::new())
    }
}

impl BenchFactory for NullBench {
    fn device(&self, name: &str) -> Result<Arc<dyn Device>, EngineError> {
        let mut devices = self.devices.lock().expect("bench device table poisoned");
        let device = devices
            .entry(name.to_owned())
            .or_insert_with(|| {
                Arc::new(NullDevice {
                    name: name.to_owned(),
                    log: Mutex::new(Vec::new()),
                })
            })
            .clone();
        Ok(device)
    }

    fn equipment(&self, name: &str) -> Result<Arc<dyn Equipment>, EngineError> {
        let mut table = self.equipment.lock().expect("bench equipment table poisoned");
        let handle = table
            .entry(name.to_owned())
            .or_insert_with(|| {
                Arc::new(NullEquipment {
                    name: name.to_owned(),
                })
            })
            .clone();
        Ok(handle)
    }

    fn release_all(&self) {
        self.devices
            .lock()
            .expect("bench device table poisoned")
            .clear();
        let mut table = self.equipment.lock().expect("bench equipment table poisoned");
        for handle in table.values() {
            handle.release();
        }
        table.clear();
    }
}

pub struct NullDevice {
    name: String,
    log: Mutex<Vec<String>>,
}

impl NullDevice {
    /// Push a line onto the simulated device log.
    pub fn push_log(&self, line: &str) {
        self.log
            .lock()
            .expect("device log poisoned")
            .push(line.to_owned());
    }
}

impl Device for NullDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn run_command(&self, command: &str) -> Result<String, EngineError> {
        Ok(format!("{}: {command}", self.name))
    }

    fn drain_log(&self) -> Vec<String> {
        std::mem::take(&mut self.log.lock().expect("device log poisoned"))
    }
}

pub struct NullEquipment {
    name: String,
}

impl Equipment for NullEquipment {
    fn name(&self) -> &str {
        &self.name
    }

    fn release(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_handles_are_singletons() {
        let bench = NullBench::new();
        let a = bench.device("phone1").unwrap();
        let b = bench.device("phone1").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        let c = bench.device("phone2").unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn release_all_drops_handles() {
        let bench = NullBench::new();
        let a = bench.device("phone1").unwrap();
        bench.release_all();
        let b = bench.device("phone1").unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn null_device_echoes_commands() {
        let bench = NullBench::new();
        let dev = bench.device("phone1").unwrap();
        assert_eq!(dev.run_command("ls").unwrap(), "phone1: ls");
    }

    #[test]
    fn log_drains_once() {
        let bench = NullBench::new();
        bench.device("phone1").unwrap();
        let table = bench.devices.lock().unwrap();
        let dev = table.get("phone1").unwrap().clone();
        drop(table);
        dev.push_log("boot complete");
        assert_eq!(dev.drain_log(), vec!["boot complete".to_owned()]);
        assert!(dev.drain_log().is_empty());
    }
}
