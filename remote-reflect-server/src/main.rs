use std::process;
use std::sync::Arc;
use std::time::Duration;

use remote_reflect::ReflectService;
use remote_reflect::server::ClassLoader;
use remote_reflect::transport::http::{ServerConfig, serve};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

mod demo;

fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let base_level = match std::env::var("REFLECT_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };

        EnvFilter::new(format!(
            "remote_reflect={level},remote_reflect_server={level}",
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

fn usage() {
    eprintln!(
        "Usage: remote-reflect-server [--host <addr>] [--port <port>] [--ttl <secs>] \
         [--sweep <secs>] [--await-explicit-shutdown]"
    );
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --host <addr>    Listen address [default: 0.0.0.0]");
    eprintln!("  --port <port>    Listen port [default: 5000]");
    eprintln!("  --ttl <secs>     Idle time before an unreferenced handle is evicted");
    eprintln!("                   [default: 60]");
    eprintln!("  --sweep <secs>   Identity cache sweep period [default: 30]");
    eprintln!("  --await-explicit-shutdown");
    eprintln!("                   Ignore SIGTERM; stop on SIGINT or POST /shutdown");
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let config = match parse_args(&args, ServerConfig::default()) {
        Ok(config) => config,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("error: {msg}");
                eprintln!();
            }
            usage();
            process::exit(2);
        }
    };

    init_tracing();

    if let Err(e) = run(config) {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

#[tokio::main]
async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let loader = Arc::new(ClassLoader::new());
    demo::register(&loader);
    tracing::info!(
        classes = loader.len(),
        ttl_secs = config.handle_ttl.as_secs_f64(),
        sweep_secs = config.sweep_interval.as_secs_f64(),
        "Class loader ready"
    );

    let service = Arc::new(ReflectService::new(loader, config.handle_ttl));
    serve(config, service).await
}

fn parse_secs(flag: &str, value: Option<&String>) -> Result<Duration, String> {
    let value = value.ok_or(format!("{flag} requires a value"))?;
    value
        .parse::<f64>()
        .ok()
        .and_then(|s| Duration::try_from_secs_f64(s).ok())
        .ok_or(format!("{flag}: invalid duration '{value}'"))
}

fn parse_args(args: &[String], mut config: ServerConfig) -> Result<ServerConfig, String> {
    let mut i = 1; // skip argv[0]
    while i < args.len() {
        match args[i].as_str() {
            "--host" => {
                i += 1;
                config.host = args.get(i).ok_or("--host requires a value")?.clone();
            }
            "--port" => {
                i += 1;
                let port = args.get(i).ok_or("--port requires a value")?;
                config.port = port
                    .parse()
                    .map_err(|_| format!("--port: invalid port '{port}'"))?;
            }
            "--ttl" => {
                i += 1;
                config.handle_ttl = parse_secs("--ttl", args.get(i))?;
            }
            "--sweep" => {
                i += 1;
                let sweep = parse_secs("--sweep", args.get(i))?;
                if sweep.is_zero() {
                    return Err("--sweep must be positive".to_string());
                }
                config.sweep_interval = sweep;
            }
            "--await-explicit-shutdown" => config.await_explicit_shutdown = true,
            "--help" | "-h" => return Err(String::new()),
            arg => return Err(format!("unexpected argument: {arg}")),
        }
        i += 1;
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("remote-reflect-server")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn defaults_without_flags() {
        let config = parse_args(&args(&[]), ServerConfig::default()).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 5000);
    }

    #[test]
    fn flags_override_defaults() {
        let config = parse_args(
            &args(&[
                "--host",
                "127.0.0.1",
                "--port",
                "8080",
                "--ttl",
                "1.5",
                "--sweep",
                "10",
                "--await-explicit-shutdown",
            ]),
            ServerConfig::default(),
        )
        .unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.handle_ttl, Duration::from_millis(1500));
        assert_eq!(config.sweep_interval, Duration::from_secs(10));
        assert!(config.await_explicit_shutdown);
    }

    #[test]
    fn bad_flags_are_reported() {
        let defaults = ServerConfig::default;
        assert!(parse_args(&args(&["--port", "http"]), defaults()).is_err());
        assert!(parse_args(&args(&["--ttl"]), defaults()).is_err());
        assert!(parse_args(&args(&["--ttl", "-1"]), defaults()).is_err());
        assert!(parse_args(&args(&["--sweep", "0"]), defaults()).is_err());
        assert!(parse_args(&args(&["--verbose"]), defaults()).is_err());
        assert_eq!(parse_args(&args(&["--help"]), defaults()).unwrap_err(), "");
    }
}
