//! Default logger provider backed by the process-wide Stackdriver logger.

use microframework_logging::{
    LogDestination, Logger, LoggerCell, RequestMetadata, ScopedLogger, ServiceContext,
    StackdriverLogger,
};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use crate::capabilities::{LoggerProvider, RequestLogger};
use crate::request::ServerEnv;
use crate::request_logger::StackdriverRequestLogger;

/// Provides a [`ScopedLogger`] over the shared [`StackdriverLogger`].
///
/// The shared logger is built on first use only, from this provider's
/// service name, version file and destination. If another provider in the
/// process already built it, that instance is reused as-is.
#[derive(Debug)]
pub struct DefaultStackdriverLoggerProvider {
    service_name: String,
    version_file: PathBuf,
    destination: LogDestination,
    cell: LoggerCell,
    server: Option<ServerEnv>,
    logger: OnceLock<Arc<ScopedLogger>>,
}

impl DefaultStackdriverLoggerProvider {
    pub fn new(service_name: impl Into<String>, version_file: impl Into<PathBuf>) -> Self {
        Self {
            service_name: service_name.into(),
            version_file: version_file.into(),
            destination: LogDestination::Stdout,
            cell: LoggerCell::global(),
            server: None,
            logger: OnceLock::new(),
        }
    }

    pub fn with_destination(mut self, destination: LogDestination) -> Self {
        self.destination = destination;
        self
    }

    /// Use `cell` instead of the process-wide one.
    pub fn with_cell(mut self, cell: LoggerCell) -> Self {
        self.cell = cell;
        self
    }

    /// Server variables describing the request; defaults to the process environment.
    pub fn with_server_env(mut self, server: ServerEnv) -> Self {
        self.server = Some(server);
        self
    }

    fn scoped_logger(&self) -> &Arc<ScopedLogger> {
        self.logger.get_or_init(|| {
            let shared = self.cell.get_or_init(|| {
                tracing::debug!(service = %self.service_name, "Initialising shared logger");
                StackdriverLogger::new(
                    &self.destination,
                    ServiceContext::load(self.service_name.clone(), &self.version_file),
                )
            });
            let metadata = match &self.server {
                Some(server) => RequestMetadata::from_server_vars(server.as_map()),
                None => RequestMetadata::from_server_vars(ServerEnv::from_process_env().as_map()),
            };
            Arc::new(shared.bind(metadata))
        })
    }
}

impl LoggerProvider for DefaultStackdriverLoggerProvider {
    fn get_logger(&self) -> anyhow::Result<Arc<dyn Logger>> {
        let logger: Arc<dyn Logger> = self.scoped_logger().clone();
        Ok(logger)
    }

    fn get_request_logger(&self) -> Box<dyn RequestLogger> {
        Box::new(StackdriverRequestLogger::new())
    }
}
