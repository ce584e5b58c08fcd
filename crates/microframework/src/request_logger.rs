//! Completion logging with latency derived from a high-resolution mark.

use microframework_logging::{context, Logger, RequestCompletion, RequestLogSink};
use serde_json::json;
use std::any;
use std::sync::Arc;

use crate::capabilities::RequestLogger;
use crate::clock::{Clock, HrTime, SystemClock};

/// Absolute start time of a request in fractional unix seconds.
///
/// Elapsed time comes from the monotonic marks; only the anchor is read from
/// the wall clock, so clock adjustments during the request do not skew it.
pub fn request_start_time(start_mark: HrTime, now: HrTime, wall_clock: f64) -> f64 {
    let elapsed_nanos = start_mark.elapsed_nanos(now);
    wall_clock - (elapsed_nanos / 1_000_000_000.0)
}

/// Writes completion entries through a logger's [`RequestLogSink`].
#[derive(Clone)]
pub struct StackdriverRequestLogger {
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for StackdriverRequestLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackdriverRequestLogger").finish_non_exhaustive()
    }
}

impl Default for StackdriverRequestLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl StackdriverRequestLogger {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl RequestLogger for StackdriverRequestLogger {
    fn log_request(&self, logger: &dyn Logger, start_mark: HrTime, status: u16) {
        let Some(sink) = logger.request_log_sink() else {
            // Only reachable when a provider pairs this with a logger that cannot
            // write completion entries. Report it without interrupting the request.
            let message = format!(
                "Could not log request details - got a {} instead of a {}",
                logger.kind(),
                any::type_name::<dyn RequestLogSink>()
            );
            logger.error(
                &message,
                context(json!({
                    "exception": {
                        "class": "RequestLoggingFailure",
                        "msg": message,
                        "code": 0,
                    }
                })),
            );
            return;
        };

        let request_start_time =
            request_start_time(start_mark, self.clock.hr_time(), self.clock.wall_clock());
        sink.log_request(&RequestCompletion {
            status,
            request_start_time,
        });
    }
}
