use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use futures::future::join_all;
use hyena_idempotency::config::{ConfigOverrides, ConfigResolver, FailurePolicy, IdempotencyConfig};
use hyena_idempotency::{
    IdempotencyError, IdempotencyInterceptor, InMemoryIdempotencyStore, OperationRequest,
    OperationResult, build_key,
};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Idempotency interceptor toolkit")]
struct Cli {
    /// Optional config file (TOML, or JSON when the extension is .json).
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Override the failure policy from config and environment.
    #[arg(long, value_name = "POLICY", global = true)]
    failure_policy: Option<FailurePolicy>,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the dedup key derived from a request triple.
    Key {
        #[arg(long)]
        name: String,
        #[arg(long = "type")]
        kind: Option<String>,
        #[arg(long)]
        seq: String,
    },
    /// Show resolved configuration or its schema.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Fire concurrent invocations at an in-memory store and print each outcome.
    Simulate {
        #[arg(long)]
        name: String,
        #[arg(long = "type")]
        kind: Option<String>,
        #[arg(long, default_value = "")]
        seq: String,
        /// Number of concurrent callers sharing the same request triple.
        #[arg(long, default_value_t = 3)]
        callers: usize,
        /// How long the simulated operation takes.
        #[arg(long, default_value_t = 50)]
        delay_ms: u64,
        /// Make the simulated operation fail.
        #[arg(long)]
        fail: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Print the resolved config for this invocation.
    Show {
        /// Emit JSON instead of TOML.
        #[arg(long)]
        json: bool,
    },
    /// Print the JSON schema of the config file.
    Schema,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);
    let config = resolve_config(&cli)?;

    match cli.command {
        Command::Key { name, kind, seq } => {
            let key = build_key(&name, kind.as_deref(), &seq)?;
            println!("{key}");
            Ok(())
        }
        Command::Config { command } => handle_config_command(command, &config),
        Command::Simulate {
            name,
            kind,
            seq,
            callers,
            delay_ms,
            fail,
        } => {
            let request = OperationRequest {
                name,
                kind,
                seq: Some(seq),
                payload: json!({}),
            };
            simulate(config, request, callers, Duration::from_millis(delay_ms), fail).await
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn resolve_config(cli: &Cli) -> Result<IdempotencyConfig> {
    let mut resolver = ConfigResolver::new()
        .with_process_env()
        .with_cli_overrides(ConfigOverrides {
            failure_policy: cli.failure_policy,
            ..Default::default()
        });
    if let Some(path) = &cli.config {
        resolver = resolver.with_file(path);
    }
    resolver.load().context("resolve idempotency config")
}

fn handle_config_command(cmd: ConfigCommand, config: &IdempotencyConfig) -> Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(config).context("serialize config to json")?
                );
            } else {
                println!(
                    "{}",
                    toml::to_string_pretty(config).context("serialize config to toml")?
                );
            }
        }
        ConfigCommand::Schema => {
            let schema = schemars::schema_for!(IdempotencyConfig);
            println!(
                "{}",
                serde_json::to_string_pretty(&schema).context("serialize config schema")?
            );
        }
    }
    Ok(())
}

async fn simulate(
    config: IdempotencyConfig,
    request: OperationRequest<Value>,
    callers: usize,
    delay: Duration,
    fail: bool,
) -> Result<()> {
    if callers == 0 {
        return Err(anyhow!("--callers must be at least 1"));
    }
    let store = Arc::new(InMemoryIdempotencyStore::from_config(&config.store));
    let interceptor = IdempotencyInterceptor::builder()
        .with_store(store)
        .with_config(config)
        .build();

    let attempts = (0..callers).map(|caller| {
        let interceptor = &interceptor;
        let request = request.clone();
        async move {
            let outcome = interceptor
                .invoke(request, |req| simulated_operation(req, delay, fail))
                .await;
            report("concurrent", caller, outcome);
        }
    });
    join_all(attempts).await;

    let outcome = interceptor
        .invoke(request, |req| simulated_operation(req, delay, fail))
        .await;
    report("replay", callers, outcome);

    eprintln!(
        "{}",
        serde_json::to_string(&interceptor.metrics().snapshot()).context("serialize metrics")?
    );
    Ok(())
}

async fn simulated_operation(
    request: OperationRequest<Value>,
    delay: Duration,
    fail: bool,
) -> Result<OperationResult<Value>> {
    tokio::time::sleep(delay).await;
    if fail {
        anyhow::bail!("simulated failure in {}", request.name);
    }
    Ok(OperationResult::ok(json!({
        "operation": request.name,
        "executedAt": format!("{:?}", std::time::SystemTime::now()),
    })))
}

fn report(
    phase: &str,
    caller: usize,
    outcome: std::result::Result<OperationResult<Value>, IdempotencyError>,
) {
    let line = match outcome {
        Ok(result) => json!({"phase": phase, "caller": caller, "result": result}),
        Err(err) => json!({"phase": phase, "caller": caller, "error": err.to_string()}),
    };
    println!("{line}");
}
