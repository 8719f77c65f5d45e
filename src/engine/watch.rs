use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::EngineError;

/// Cooperative cancellation flag shared across a campaign.
///
/// Steps that block on I/O or sleeps must poll the flag at least every
/// 200 ms; composites stop submitting further children once it is set.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Fail with `Interrupted` if cancellation has been requested.
    ///
    /// # Errors
    ///
    /// Returns an interrupted-kind error when the flag is set.
    pub fn checkpoint(&self) -> Result<(), EngineError> {
        if self.is_cancelled() {
            Err(EngineError::interrupted("cancellation requested"))
        } else {
            Ok(())
        }
    }
}

/// A registered device-log watcher: a substring pattern and the label a
/// step uses to query whether the pattern appeared.
///
/// The engine stores registrations and matches drained log lines; feeding
/// the log stream is the device collaborator's concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogWatcher {
    pub label: String,
    pub pattern: String,
}

/// Per-case registry of log watchers and their hits.
#[derive(Default)]
pub struct WatcherRegistry {
    watchers: Mutex<Vec<LogWatcher>>,
    hits: Mutex<Vec<String>>,
}

impl WatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, label: &str, pattern: &str) {
        self.watchers
            .lock()
            .expect("watcher table poisoned")
            .push(LogWatcher {
                label: label.to_owned(),
                pattern: pattern.to_owned(),
            });
    }

    /// Match a batch of log lines against every registered watcher,
    /// recording the labels that triggered.
    pub fn observe(&self, lines: &[String]) {
        let watchers = self.watchers.lock().expect("watcher table poisoned");
        let mut hits = self.hits.lock().expect("watcher hits poisoned");
        for line in lines {
            for watcher in watchers.iter() {
                if line.contains(&watcher.pattern) {
                    hits.push(watcher.label.clone());
                }
            }
        }
    }

    /// Whether the watcher with this label has triggered at least once.
    pub fn triggered(&self, label: &str) -> bool {
        self.hits
            .lock()
            .expect("watcher hits poisoned")
            .iter()
            .any(|hit| hit == label)
    }

    pub fn registrations(&self) -> Vec<LogWatcher> {
        self.watchers.lock().expect("watcher table poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn checkpoint_passes_until_cancelled() {
        let token = CancelToken::new();
        assert!(token.checkpoint().is_ok());
        token.cancel();
        assert!(token.is_cancelled());
        assert_eq!(token.checkpoint().unwrap_err().kind, ErrorKind::Interrupted);
    }

    #[test]
    fn clones_share_the_flag() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn watcher_matches_substring() {
        let registry = WatcherRegistry::new();
        registry.register("crash", "FATAL EXCEPTION");
        registry.observe(&["ok line".into(), "FATAL EXCEPTION in main".into()]);
        assert!(registry.triggered("crash"));
        assert!(!registry.triggered("other"));
    }

    #[test]
    fn registrations_are_listed() {
        let registry = WatcherRegistry::new();
        registry.register("boot", "Boot completed");
        let regs = registry.registrations();
        assert_eq!(regs.len(), 1);
        assert_eq!(regs[0].pattern, "Boot completed");
    }
}
