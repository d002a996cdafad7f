//! Decode a saved RTX configuration and print every feature as JSON.
//!
//! The saved file stands in for a live router: a small executor answers
//! every show command with the file contents, and the decoders pick the
//! lines they own.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example decode_config -- --file router.conf
//! RUST_LOG=debug cargo run --example decode_config -- --file router.conf --feature tunnel
//! ```

use std::env;
use std::future::Future;
use std::path::PathBuf;

use rtxconf::dialect::rtx;
use rtxconf::feature::{
    DnsServerSelects, DynamicFilters, IpFilters, PpInterfaces, Schedules, SecureFilters,
    StaticRoutes, Tunnels,
};
use rtxconf::{Device, Executor, Feature};
use serde::Serialize;
use serde_json::{Map, Value};

/// Answers every command with a saved configuration.
struct SavedConfig {
    text: String,
}

impl Executor for SavedConfig {
    fn execute(&mut self, command: &str) -> impl Future<Output = rtxconf::Result<String>> + Send {
        log::debug!("serving '{}' from saved config", command);
        let text = self.text.clone();
        async move { Ok(text) }
    }
}

async fn dump<F>(
    device: &mut Device<SavedConfig>,
    only: Option<&str>,
    out: &mut Map<String, Value>,
) -> Result<(), Box<dyn std::error::Error>>
where
    F: Feature,
    F::Record: Serialize,
{
    if only.is_some_and(|name| name != F::NAME) {
        return Ok(());
    }

    let decoded = device.read::<F>().await?;
    for error in &decoded.errors {
        eprintln!("  {}", error);
    }
    out.insert(F::NAME.to_string(), serde_json::to_value(&decoded.records)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging (set RUST_LOG=debug for verbose output)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let Some(file) = args.file else {
        eprintln!("Error: Must provide --file");
        std::process::exit(1);
    };

    let text = tokio::fs::read_to_string(&file).await?;
    let dialect = rtx::dialect();

    let parsed = rtxconf::Parser::new(&dialect).parse(&text);
    println!(
        "{}: {} logical lines, {} ambiguous joins",
        file.display(),
        parsed.line_count,
        parsed.ambiguities.len()
    );
    for ambiguity in &parsed.ambiguities {
        log::warn!(
            "line {}: joined '{}' with '{}'",
            ambiguity.line_number,
            ambiguity.current,
            ambiguity.next
        );
    }

    let mut device = Device::new(SavedConfig { text }, dialect);
    let only = args.feature.as_deref();
    let mut out = Map::new();

    dump::<IpFilters>(&mut device, only, &mut out).await?;
    dump::<DynamicFilters>(&mut device, only, &mut out).await?;
    dump::<SecureFilters>(&mut device, only, &mut out).await?;
    dump::<StaticRoutes>(&mut device, only, &mut out).await?;
    dump::<Tunnels>(&mut device, only, &mut out).await?;
    dump::<PpInterfaces>(&mut device, only, &mut out).await?;
    dump::<Schedules>(&mut device, only, &mut out).await?;
    dump::<DnsServerSelects>(&mut device, only, &mut out).await?;

    println!("{}", serde_json::to_string_pretty(&Value::Object(out))?);
    Ok(())
}

/// Simple argument parser
struct Args {
    file: Option<PathBuf>,
    feature: Option<String>,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = env::args().collect();
        let mut file = None;
        let mut feature = None;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--file" | "-f" => {
                    i += 1;
                    if i < args.len() {
                        file = Some(PathBuf::from(&args[i]));
                    }
                }
                "--feature" => {
                    i += 1;
                    if i < args.len() {
                        feature = Some(args[i].clone());
                    }
                }
                "--help" => {
                    Self::print_help();
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                }
            }
            i += 1;
        }

        Self { file, feature }
    }

    fn print_help() {
        println!(
            r#"rtxconf decode_config example

USAGE:
    cargo run --example decode_config -- [OPTIONS]

OPTIONS:
    -f, --file <PATH>        Saved `show config` output
    --feature <NAME>         Only decode one feature (ip_filter, tunnel, pp, ...)
    --help                   Print this help message
"#
        );
    }
}
