//! Error classification policy
//!
//! Two kinds of fault can surface while an application runs:
//!
//! - **Diagnostics**: conditions the application detects and reports itself
//!   (a deprecated call, a missing optional value). They are classified by
//!   [`Severity`] and checked against the active [`SeverityMask`]; reported
//!   severities become a [`Diagnostic`] error that fails the request, masked
//!   ones are logged at debug level and execution continues.
//! - **Panics**: caught by the supervisor. While a [`SupervisedScope`] is
//!   alive on the current thread the process panic hook records the panic
//!   (message, location, backtrace) instead of printing it.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::marker::PhantomData;
use std::panic::{self, Location, PanicHookInfo};
use std::str::FromStr;
use std::sync::Once;
use thiserror::Error;

/// Class of a reported diagnostic, least severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Deprecated,
    Notice,
    Warning,
    Error,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Deprecated,
        Severity::Notice,
        Severity::Warning,
        Severity::Error,
    ];

    fn bit(self) -> u8 {
        1 << (self as u8)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Deprecated => "deprecated",
            Severity::Notice => "notice",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }

    fn title(&self) -> &'static str {
        match self {
            Severity::Deprecated => "Deprecated",
            Severity::Notice => "Notice",
            Severity::Warning => "Warning",
            Severity::Error => "Error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

/// Set of severities that are reported (and so fail the request).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SeverityMask(u8);

impl SeverityMask {
    pub const ALL: SeverityMask = SeverityMask(0b1111);
    pub const NONE: SeverityMask = SeverityMask(0);

    pub fn contains(self, severity: Severity) -> bool {
        self.0 & severity.bit() != 0
    }

    pub fn with(self, severity: Severity) -> Self {
        SeverityMask(self.0 | severity.bit())
    }

    pub fn without(self, severity: Severity) -> Self {
        SeverityMask(self.0 & !severity.bit())
    }

    pub fn severities(self) -> impl Iterator<Item = Severity> {
        Severity::ALL.into_iter().filter(move |s| self.contains(*s))
    }
}

impl Default for SeverityMask {
    fn default() -> Self {
        SeverityMask::ALL
    }
}

impl fmt::Debug for SeverityMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.severities()).finish()
    }
}

impl fmt::Display for SeverityMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            SeverityMask::ALL => f.write_str("all"),
            SeverityMask::NONE => f.write_str("none"),
            mask => {
                let names: Vec<_> = mask.severities().map(|s| s.as_str()).collect();
                f.write_str(&names.join(","))
            }
        }
    }
}

/// Returned when a severity mask cannot be parsed.
#[derive(Debug, Error)]
#[error("unknown severity '{0}' (expected deprecated, notice, warning, error, all or none)")]
pub struct ParseSeverityError(String);

impl FromStr for SeverityMask {
    type Err = ParseSeverityError;

    /// Parse `all`, `none`, or a comma-separated list of severities.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut mask = SeverityMask::NONE;
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match part.to_ascii_lowercase().as_str() {
                "all" => mask = SeverityMask::ALL,
                "none" => {}
                name => {
                    let severity = Severity::ALL
                        .into_iter()
                        .find(|s| s.as_str() == name)
                        .ok_or_else(|| ParseSeverityError(part.to_string()))?;
                    mask = mask.with(severity);
                }
            }
        }
        Ok(mask)
    }
}

/// A reported diagnostic, raised as a failure.
#[derive(Debug, Error)]
#[error("{severity}: {message}")]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub location: &'static Location<'static>,
}

/// Decides whether a diagnostic fails the request.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorPolicy {
    mask: SeverityMask,
}

impl ErrorPolicy {
    pub fn new(mask: SeverityMask) -> Self {
        Self { mask }
    }

    pub fn mask(&self) -> SeverityMask {
        self.mask
    }

    pub fn is_reported(&self, severity: Severity) -> bool {
        self.mask.contains(severity)
    }

    /// Classify a diagnostic.
    ///
    /// Returns `Err` when the severity is reported, so callers can `?` it
    /// straight out of a handler. Masked severities return `Ok(())`.
    #[track_caller]
    pub fn check(&self, severity: Severity, message: impl Into<String>) -> Result<(), Diagnostic> {
        let message = message.into();
        let location = Location::caller();
        if self.is_reported(severity) {
            return Err(Diagnostic {
                severity,
                message,
                location,
            });
        }

        tracing::debug!(
            severity = severity.as_str(),
            file = location.file(),
            line = location.line(),
            "Suppressed diagnostic: {}",
            message
        );
        Ok(())
    }

    /// Mark the current thread as supervised until the guard is dropped.
    pub fn supervise(&self) -> SupervisedScope {
        install_panic_hook();
        SUPERVISED.with(|depth| depth.set(depth.get() + 1));
        LAST_PANIC.with(|slot| slot.borrow_mut().take());
        SupervisedScope {
            _not_send: PhantomData,
        }
    }
}

/// Details of a panic recorded by the hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanicRecord {
    pub message: String,
    pub file: String,
    pub line: u32,
    pub backtrace: Option<String>,
}

thread_local! {
    static SUPERVISED: Cell<usize> = const { Cell::new(0) };
    static LAST_PANIC: RefCell<Option<PanicRecord>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

fn install_panic_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info: &PanicHookInfo<'_>| {
            let supervised = SUPERVISED.try_with(Cell::get).unwrap_or(0) > 0;
            if !supervised {
                previous(info);
                return;
            }

            let (file, line) = info
                .location()
                .map(|l| (l.file().to_string(), l.line()))
                .unwrap_or_default();
            let backtrace = Backtrace::capture();
            let record = PanicRecord {
                message: panic_message(info.payload()),
                file,
                line,
                backtrace: (backtrace.status() == BacktraceStatus::Captured)
                    .then(|| backtrace.to_string()),
            };
            let _ = LAST_PANIC.try_with(|slot| *slot.borrow_mut() = Some(record));
        }));
    });
}

/// Active while the supervisor runs application code on this thread.
#[must_use = "panics are only captured while the scope is alive"]
pub struct SupervisedScope {
    _not_send: PhantomData<*const ()>,
}

impl SupervisedScope {
    /// The panic recorded since the scope began, if any.
    pub fn take_panic(&self) -> Option<PanicRecord> {
        LAST_PANIC.with(|slot| slot.borrow_mut().take())
    }
}

impl Drop for SupervisedScope {
    fn drop(&mut self) {
        let _ = SUPERVISED.try_with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
