#![forbid(unsafe_code)]

use std::env;
use std::fs;

use proctor_tools::replay::{parse_trace, replay};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: proctor replay <trace.json>";

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(2);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

fn run() -> Result<(), String> {
    let args: Vec<String> = env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("replay") => {}
        _ => return Err(USAGE.to_string()),
    }
    let path = args.get(1).ok_or_else(|| USAGE.to_string())?;
    let raw = fs::read_to_string(path).map_err(|e| format!("failed to read {path}: {e}"))?;
    let trace = parse_trace(&raw)?;
    tracing::info!(
        exam_id = trace.exam_id.as_str(),
        events = trace.events.len(),
        "replaying trace"
    );
    let report = replay(&trace)?;
    println!("{}", report.render());
    Ok(())
}
