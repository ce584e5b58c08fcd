//! Process-wide logger instance.

use std::sync::{Arc, OnceLock};

use crate::stackdriver::StackdriverLogger;

/// Holds at most one [`StackdriverLogger`].
///
/// Clones share the same slot. The first successful initialisation wins and
/// every later call returns that instance, so service metadata is read once
/// per process no matter how many requests run.
#[derive(Debug, Clone, Default)]
pub struct LoggerCell {
    slot: Arc<OnceLock<Arc<StackdriverLogger>>>,
}

impl LoggerCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cell shared by the whole process.
    pub fn global() -> LoggerCell {
        static GLOBAL: OnceLock<LoggerCell> = OnceLock::new();
        GLOBAL.get_or_init(LoggerCell::new).clone()
    }

    /// Return the stored logger, creating it with `init` on first use.
    pub fn get_or_init<F>(&self, init: F) -> Arc<StackdriverLogger>
    where
        F: FnOnce() -> StackdriverLogger,
    {
        Arc::clone(self.slot.get_or_init(|| Arc::new(init())))
    }

    pub fn instance(&self) -> Option<Arc<StackdriverLogger>> {
        self.slot.get().cloned()
    }

    pub fn is_initialised(&self) -> bool {
        self.slot.get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ServiceContext;
    use crate::stackdriver::{LogDestination, SharedBuffer};

    fn build(service: &str) -> StackdriverLogger {
        StackdriverLogger::new(
            &LogDestination::Memory(SharedBuffer::new()),
            ServiceContext::new(service, "1"),
        )
    }

    #[test]
    fn test_first_initialisation_wins() {
        let cell = LoggerCell::new();
        assert!(!cell.is_initialised());

        let first = cell.get_or_init(|| build("first"));
        let second = cell.get_or_init(|| build("second"));

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.service().unwrap().service, "first");
    }

    #[test]
    fn test_clones_share_the_slot() {
        let cell = LoggerCell::new();
        let other = cell.clone();
        let logger = cell.get_or_init(|| build("shared"));

        assert!(other.is_initialised());
        assert!(Arc::ptr_eq(&logger, &other.instance().unwrap()));
    }

    #[test]
    fn test_global_returns_same_slot() {
        let logger = LoggerCell::global().get_or_init(|| build("global"));
        let again = LoggerCell::global().instance().unwrap();
        assert!(Arc::ptr_eq(&logger, &again));
    }
}
