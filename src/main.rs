//! Command-line front end: read a JSON forecast request, print the result.
//!
//! Usage: sentinel [REQUEST.json | -] [--uniform] [--concurrent]
//!
//! The request is read from the path argument, or stdin when it is `-` or
//! absent. `SENTINEL_CONFIG` names an optional JSON config file; otherwise
//! `SENTINEL_*` variables override the defaults. `--uniform` replaces the
//! ephemeris modulation with constant 1.0 series.

use anyhow::{Context, Result};
use std::io::Read;
use std::path::PathBuf;

use sentinel::logging::{log, obj, v_num, v_str, Domain, Level};
use sentinel::{EngineConfig, ForecastEngine, ForecastRequest};

fn load_config() -> Result<EngineConfig> {
    match std::env::var("SENTINEL_CONFIG") {
        Ok(path) if !path.trim().is_empty() => {
            let cfg = EngineConfig::from_json_file(&PathBuf::from(&path))
                .with_context(|| format!("loading config from {}", path))?;
            Ok(cfg)
        }
        _ => Ok(EngineConfig::from_env()),
    }
}

fn read_request(path: Option<&str>) -> Result<String> {
    match path {
        Some(p) if p != "-" => {
            std::fs::read_to_string(p).with_context(|| format!("reading request {}", p))
        }
        _ => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading request from stdin")?;
            Ok(buf)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let uniform = args.iter().any(|a| a == "--uniform");
    let concurrent = args.iter().any(|a| a == "--concurrent");
    let path = args.iter().find(|a| !a.starts_with("--")).map(String::as_str);

    let config = load_config()?;
    log(
        Level::Info,
        Domain::System,
        "startup",
        obj(&[
            ("config_fingerprint", v_str(&config.fingerprint())),
            ("uniform", v_str(if uniform { "true" } else { "false" })),
            ("concurrent", v_str(if concurrent { "true" } else { "false" })),
        ]),
    );

    let engine = if uniform {
        ForecastEngine::uniform(config)?
    } else {
        ForecastEngine::with_ephemeris(config)?
    };

    let raw = read_request(path)?;
    let request: ForecastRequest =
        serde_json::from_str(&raw).context("parsing forecast request")?;
    let inputs = request.into_inputs(&engine.config().forecast)?;

    let result = if concurrent {
        engine.synthesize_concurrent(&inputs).await?
    } else {
        engine.synthesize(&inputs)?
    };

    log(
        Level::Info,
        Domain::System,
        "complete",
        obj(&[
            ("peaks", v_num(result.peak_indices.len() as f64)),
            ("diagnostics", v_num(result.diagnostics.len() as f64)),
            ("digest", v_str(&result.digest())),
        ]),
    );
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
