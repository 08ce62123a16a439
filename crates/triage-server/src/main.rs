use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use triage::transport::{ServerConfig, serve};
use triage::{AdmissionService, EngineConfig, InMemoryStore, Seed};

const USAGE: &str = "Usage: triage-server [--host <addr>] [--port <port>] [--workers <n>] \
[--wait-timeout <secs>] [--drain-timeout <secs>] [--seed <file.json>]";

#[derive(Debug)]
struct Options {
    server: ServerConfig,
    engine: EngineConfig,
    seed: Option<PathBuf>,
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let options = match parse_args(&args) {
        Ok(v) => v,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("error: {msg}");
                eprintln!();
            }
            eprintln!("{USAGE}");
            eprintln!();
            eprintln!("Options:");
            eprintln!("  --host <addr>          Bind address [default: 0.0.0.0]");
            eprintln!("  --port <port>          Listen port [default: 8080]");
            eprintln!("  --workers <n>          Allocation workers [default: 1, env TRIAGE_WORKERS]");
            eprintln!(
                "  --wait-timeout <secs>  Bounded wait per request [default: 2, env TRIAGE_WAIT_TIMEOUT]"
            );
            eprintln!(
                "  --drain-timeout <secs> Shutdown drain budget [default: 10, env TRIAGE_DRAIN_TIMEOUT]"
            );
            eprintln!("  --seed <file.json>     Hospitals, reports and patients to preload");
            process::exit(2);
        }
    };

    init_tracing();

    if let Err(e) = run(options) {
        tracing::error!(error = %format!("{e:#}"), "triage-server failed");
        process::exit(1);
    }
}

fn parse_seconds(flag: &str, value: Option<&String>) -> Result<Duration, String> {
    let value = value.ok_or_else(|| format!("{flag} requires a value"))?;
    value
        .parse::<f64>()
        .ok()
        .filter(|s| s.is_finite() && *s > 0.0)
        .map(Duration::from_secs_f64)
        .ok_or_else(|| format!("{flag}: expected positive seconds, got '{value}'"))
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut server = ServerConfig::default();
    let mut engine = EngineConfig::default();
    let mut seed = None;

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        match args[i].as_str() {
            "--host" => {
                i += 1;
                server.host = args.get(i).ok_or("--host requires a value")?.clone();
            }
            "--port" => {
                i += 1;
                let value = args.get(i).ok_or("--port requires a value")?;
                server.port = value
                    .parse()
                    .map_err(|_| format!("--port: invalid port '{value}'"))?;
            }
            "--workers" => {
                i += 1;
                let value = args.get(i).ok_or("--workers requires a value")?;
                let workers = value
                    .parse()
                    .map_err(|_| format!("--workers: invalid count '{value}'"))?;
                engine = engine.with_workers(workers);
            }
            "--wait-timeout" => {
                i += 1;
                engine = engine.with_wait_timeout(parse_seconds("--wait-timeout", args.get(i))?);
            }
            "--drain-timeout" => {
                i += 1;
                engine = engine.with_drain_timeout(parse_seconds("--drain-timeout", args.get(i))?);
            }
            "--seed" => {
                i += 1;
                seed = Some(PathBuf::from(args.get(i).ok_or("--seed requires a value")?));
            }
            "--help" | "-h" => return Err(String::new()),
            arg => return Err(format!("unexpected argument: {arg}")),
        }
        i += 1;
    }

    Ok(Options {
        server,
        engine,
        seed,
    })
}

/// Level from `RUST_LOG`, else `TRIAGE_LOG` (debug|info|warn|error).
/// `LOG_FORMAT=json` switches to JSON lines. Always writes to stderr.
fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let base_level = match std::env::var("TRIAGE_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("trace") => "trace",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!(
            "triage={level},triage_server={level}",
            level = base_level
        ))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

fn load_seed(path: &Path) -> anyhow::Result<InMemoryStore> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read seed file {}", path.display()))?;
    let seed: Seed = serde_json::from_str(&raw)
        .with_context(|| format!("invalid seed file {}", path.display()))?;
    let (hospitals, reports, patients) =
        (seed.hospitals.len(), seed.reports.len(), seed.patients.len());
    let store = InMemoryStore::from_seed(seed)
        .with_context(|| format!("inconsistent seed data in {}", path.display()))?;
    tracing::info!(hospitals, reports, patients, "Loaded seed data");
    Ok(store)
}

fn run(options: Options) -> anyhow::Result<()> {
    let store = match options.seed.as_deref() {
        Some(path) => load_seed(path)?,
        None => {
            tracing::warn!("No --seed given, starting with an empty store");
            InMemoryStore::new()
        }
    };
    let service = Arc::new(AdmissionService::new(Arc::new(store), options.engine));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    runtime.block_on(serve(options.server, service))
}
