use std::thread;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use zen_smu::{Cpu, SmuConfig, SmuStatus};

const DEFAULT_INTERVAL_MS: u64 = 1000;
const DEFAULT_SAMPLES: usize = 10;

fn parse_arg<T: std::str::FromStr>(args: &[String], flag: &str, default: T) -> T {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let interval = Duration::from_millis(parse_arg(&args, "--interval-ms", DEFAULT_INTERVAL_MS));
    let samples = parse_arg(&args, "--samples", DEFAULT_SAMPLES);

    let cpu = Cpu::open(SmuConfig::from_env())?;
    let Some(table) = cpu.power_table() else {
        warn!("No power table: {:?}", cpu.last_error());
        return Ok(());
    };
    info!(
        "Watching power table {:#x} at {:#x}",
        table.layout().version,
        table.dram_base_address()
    );

    let changes = table.subscribe();
    for sample in 0..samples {
        match cpu.refresh_power_table() {
            SmuStatus::Ok => {
                for change in changes.try_iter() {
                    let before = change.previous.map_or(f32::NAN, |v| v.as_f32());
                    let after = change.current.map_or(f32::NAN, |v| v.as_f32());
                    println!(
                        "[{sample:>3}] {:<14} {before:>10.3} -> {after:>10.3}",
                        change.field.name()
                    );
                }
            }
            status => warn!("Refresh failed: {status}"),
        }
        thread::sleep(interval);
    }

    Ok(())
}
