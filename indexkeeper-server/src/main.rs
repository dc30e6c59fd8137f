use clap::{parser::ValueSource, ArgMatches, CommandFactory, FromArgMatches, Parser, Subcommand};
use indexkeeper::{
    HttpConnector, IndexReconciler, LifecycleRequest, LifecycleStatus, ProvisionError,
    ProvisionerConfig, ResourceProvider, RetryPolicy,
};
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

/// Event could not be read or parsed, or configuration is invalid.
const EXIT_USAGE: u8 = 2;
/// Retryable failure; the event should be redelivered (EX_TEMPFAIL).
const EXIT_RETRY: u8 = 75;

#[derive(Parser)]
#[command(name = "indexkeeper", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// JSON config file. Without one, INDEXKEEPER_* variables and defaults apply.
    #[arg(long, env = "INDEXKEEPER_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Execution deadline granted to one invocation, in milliseconds.
    /// Overrides `executionDeadlineMs` (INDEXKEEPER_EXECUTION_DEADLINE_MS).
    #[arg(long, global = true)]
    deadline_ms: Option<u64>,
}

#[derive(Subcommand)]
enum Command {
    /// Reconcile one lifecycle event and print the lifecycle response
    Handle {
        /// Path to the event JSON, or `-` for stdin
        #[arg(long, default_value = "-")]
        event: String,
    },
    /// Accept lifecycle events over HTTP
    Serve {
        #[arg(long, env = "INDEXKEEPER_BIND_ADDR")]
        bind_addr: Option<String>,
        #[arg(long, env = "INDEXKEEPER_PORT")]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let matches = Cli::command().get_matches();
    let cli = match Cli::from_arg_matches(&matches) {
        Ok(cli) => cli,
        Err(e) => e.exit(),
    };

    indexkeeper::logging::init_tracing();

    let config = match resolve_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ERROR: {e}");
            return ExitCode::from(EXIT_USAGE);
        }
    };

    match &cli.command {
        Command::Handle { event } => run_handle(event, config).await,
        Command::Serve { .. } => {
            let bind_addr = match resolve_bind_addr(&cli, &matches) {
                Ok(addr) => addr,
                Err(msg) => {
                    eprintln!("ERROR: {msg}");
                    return ExitCode::from(EXIT_USAGE);
                }
            };
            match indexkeeper_http::serve(config, &bind_addr).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("ERROR: {e}");
                    ExitCode::FAILURE
                }
            }
        }
    }
}

fn resolve_config(cli: &Cli) -> Result<ProvisionerConfig, ProvisionError> {
    let mut config = ProvisionerConfig::load(cli.config.as_deref())?;
    if let Some(deadline_ms) = cli.deadline_ms {
        config.execution_deadline_ms = deadline_ms;
        config.validate()?;
    }
    Ok(config)
}

async fn run_handle(source: &str, config: ProvisionerConfig) -> ExitCode {
    let request = match read_event(source) {
        Ok(request) => request,
        Err(msg) => {
            eprintln!("ERROR: {msg}");
            return ExitCode::from(EXIT_USAGE);
        }
    };
    // The budget starts before the connector is built so setup time counts.
    let deadline = config.deadline();

    let connector = match HttpConnector::new(config.request_timeout()) {
        Ok(connector) => connector,
        Err(e) => {
            eprintln!("ERROR: {e}");
            return ExitCode::FAILURE;
        }
    };
    let provider = ResourceProvider::new(IndexReconciler::new(
        connector,
        RetryPolicy::from_settings(&config.retry),
    ));

    match provider.respond(request, deadline).await {
        Ok(response) => {
            match serde_json::to_string(&response) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("ERROR: failed to encode response: {e}");
                    return ExitCode::FAILURE;
                }
            }
            match response.status {
                LifecycleStatus::Success => ExitCode::SUCCESS,
                LifecycleStatus::Failed => ExitCode::FAILURE,
            }
        }
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::json!({"error": e.kind(), "message": e.to_string(), "retryable": true})
            );
            ExitCode::from(EXIT_RETRY)
        }
    }
}

fn read_event(source: &str) -> Result<LifecycleRequest, String> {
    let raw = if source == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| format!("failed to read event from stdin: {e}"))?;
        buf
    } else {
        std::fs::read_to_string(source).map_err(|e| format!("failed to read {source}: {e}"))?
    };
    serde_json::from_str(&raw).map_err(|e| format!("invalid lifecycle event: {e}"))
}

fn resolve_bind_addr(cli: &Cli, matches: &ArgMatches) -> Result<String, String> {
    let Command::Serve { bind_addr, port } = &cli.command else {
        return Err("bind address only applies to `serve`".to_string());
    };
    let serve_matches = matches
        .subcommand_matches("serve")
        .ok_or_else(|| "bind address only applies to `serve`".to_string())?;

    if is_set_on_command_line(serve_matches, "bind_addr")
        && is_set_on_command_line(serve_matches, "port")
    {
        return Err("--port cannot be used with --bind-addr".to_string());
    }
    if is_set_on_command_line(serve_matches, "port") {
        if let Some(port) = port {
            return Ok(format!("127.0.0.1:{port}"));
        }
    }
    if let Some(bind_addr) = bind_addr {
        return Ok(bind_addr.clone());
    }
    if let Some(port) = port {
        return Ok(format!("127.0.0.1:{port}"));
    }
    Ok("127.0.0.1:7710".to_string())
}

fn is_set_on_command_line(matches: &ArgMatches, arg: &str) -> bool {
    matches.value_source(arg) == Some(ValueSource::CommandLine)
}
