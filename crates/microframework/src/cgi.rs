//! Running one invocation as a CGI script.
//!
//! stdout belongs to the response: the gateway parses everything written
//! there as the head and body. Log lines must go elsewhere.

use microframework_logging::LogDestination;
use std::io::Write;

use crate::supervisor::{ExecutionReport, Invocation, MicroFramework};
use crate::transport::{Framing, WriterTransport};

/// Log destination that can be used next to a CGI response.
///
/// `None` and stdout both resolve to stderr.
pub fn log_destination(requested: Option<LogDestination>) -> LogDestination {
    match requested {
        None => LogDestination::Stderr,
        Some(LogDestination::Stdout) => {
            tracing::warn!("stdout carries the CGI response, writing application logs to stderr");
            LogDestination::Stderr
        }
        Some(other) => other,
    }
}

/// Execute one invocation, writing the response to `writer` with CGI framing.
pub fn respond<W: Write>(
    framework: &MicroFramework,
    invocation: Invocation,
    writer: W,
) -> (ExecutionReport, W) {
    let mut transport = WriterTransport::new(writer, Framing::Cgi);
    let report = framework.execute(invocation, &mut transport);
    (report, transport.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_stdout_is_never_used_for_logs() {
        assert!(matches!(log_destination(None), LogDestination::Stderr));
        assert!(matches!(
            log_destination(Some(LogDestination::Stdout)),
            LogDestination::Stderr
        ));
    }

    #[test]
    fn test_other_destinations_are_kept() {
        let file = log_destination(Some(LogDestination::File(PathBuf::from("/var/log/app.log"))));
        assert!(matches!(file, LogDestination::File(path) if path == PathBuf::from("/var/log/app.log")));
        assert!(matches!(
            log_destination(Some(LogDestination::Stderr)),
            LogDestination::Stderr
        ));
    }
}
