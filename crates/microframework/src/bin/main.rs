//! Microframework entry point
//!
//! Runs the built-in liveness application, either as a development HTTP
//! server or for a single CGI request.

use clap::{Parser, Subcommand};
use microframework::server::{self, AppState};
use microframework::{
    cgi, DefaultStackdriverLoggerProvider, Factory, FrameworkConfig, Invocation, MicroFramework,
    Response, ServerEnv, ServerRequest, SystemClock,
};
use microframework_logging::LogDestination;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "microframework")]
#[command(about = "Single-request execution supervisor")]
#[command(version)]
struct Cli {
    /// Service name reported in log entries
    #[arg(long, global = true, default_value = "microframework", env = "MICROFRAMEWORK_SERVICE_NAME")]
    service_name: String,

    /// File containing the deployed version
    #[arg(long, global = true, default_value = "version", env = "MICROFRAMEWORK_VERSION_FILE")]
    version_file: PathBuf,

    /// Application log destination: stdout, stderr or a file path.
    /// Defaults to stdout for `serve` and stderr for `cgi`, where stdout is the response.
    #[arg(long, global = true, env = "MICROFRAMEWORK_LOG_DESTINATION")]
    log_destination: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the development HTTP server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080", env = "PORT")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
    },

    /// Handle one request from CGI variables and stdin, writing to stdout
    Cgi,
}

/// Logger settings shared by every invocation.
#[derive(Clone)]
struct LoggingSettings {
    service_name: String,
    version_file: PathBuf,
    destination: LogDestination,
}

impl LoggingSettings {
    fn invocation(&self, server: Option<&ServerEnv>) -> Invocation {
        let settings = self.clone();
        let server = server.cloned();
        Invocation::new(
            Factory::logger_provider(move || {
                let provider =
                    DefaultStackdriverLoggerProvider::new(settings.service_name, settings.version_file)
                        .with_destination(settings.destination);
                Ok(match server {
                    Some(server) => provider.with_server_env(server),
                    None => provider,
                })
            }),
            Factory::handler(|_ctx| {
                Ok(|_request: ServerRequest| -> anyhow::Result<Response> {
                    Ok(Response::ok("Blackbox is alive"))
                })
            }),
        )
    }
}

fn main() -> anyhow::Result<()> {
    let start_mark = SystemClock::mark();

    // stdout is reserved for the CGI response or the application log.
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let requested: Option<LogDestination> = cli
        .log_destination
        .as_deref()
        .map(str::parse::<LogDestination>)
        .transpose()?;
    let destination = match cli.command {
        Commands::Serve { .. } => requested.unwrap_or_default(),
        Commands::Cgi => cgi::log_destination(requested),
    };
    let settings = LoggingSettings {
        service_name: cli.service_name,
        version_file: cli.version_file,
        destination,
    };
    let framework = MicroFramework::new(FrameworkConfig::from_env());

    match cli.command {
        Commands::Serve { port, host } => {
            let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
            tracing::info!(
                service = %settings.service_name,
                "Starting microframework dev server on {}",
                addr
            );

            let state = AppState::new(framework, move |server: &ServerEnv| {
                settings.invocation(Some(server))
            });
            tokio::runtime::Runtime::new()?.block_on(server::serve(addr, Arc::new(state)))?;
        }

        Commands::Cgi => {
            let stdout = std::io::stdout();
            let (report, _) = cgi::respond(
                &framework,
                settings.invocation(None).with_start_mark(start_mark),
                stdout.lock(),
            );
            tracing::debug!(?report, "CGI request finished");
        }
    }

    Ok(())
}
