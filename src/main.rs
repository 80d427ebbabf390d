// Channel-map renegotiation simulator CLI
//
// Usage:
//   cargo run -- --initial-error 0.1 --max-error 0.5 --merge-success 0.5 \
//                --duration 60 --algorithm 1 [--seed 0x...] [--real-time]
//
// Prints human-readable progress lines and, as the last line of stdout, the
// bare communication-event count. Batch harnesses parse exactly that final
// integer line; everything before it is narration.

use std::env;
use std::process;
use std::thread;
use std::time::Duration;

use log::info;
use simple_logger::SimpleLogger;

use cm_sim::cm_interface::BASE_TIMEOUT_DURATION;
use cm_sim::{Algorithm, ConfigError, LoggingEventSink, SimConfig, Simulator};

struct CliArgs {
    config: SimConfig,
    real_time: bool,
}

fn main() {
    SimpleLogger::new().init().unwrap();

    let args = match parse_args(env::args().skip(1)) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("Error: {}", message);
            eprintln!();
            print_usage();
            process::exit(1);
        }
    };

    let mut sim = match Simulator::new(&args.config, LoggingEventSink::new(true)) {
        Ok(sim) => sim,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let config = &args.config;
    info!(
        "algorithm {}: {}",
        config.algorithm.id(),
        match config.algorithm {
            Algorithm::TimeTriggered => "time-triggered activation",
            Algorithm::AckGated => "activation gated on Ack2 handshake",
        }
    );
    info!(
        "rates: initial {}, max {}, merge success {}",
        config.initial_error_rate, config.max_error_rate, config.merge_success_rate
    );
    info!(
        "timeout: {}s original scale, speedup {}x, duration {}s",
        BASE_TIMEOUT_DURATION, config.speedup, config.duration_secs
    );
    info!("let seed = {:?};", sim.seed());

    let interval = sim.params().connection_interval;
    while sim.is_running() {
        sim.tick();
        if args.real_time {
            thread::sleep(Duration::from_secs_f64(interval));
        }
    }

    let summary = sim.summary();
    println!();
    println!(
        "simulation over: master channel {}, slave channel {}",
        summary.master_channel, summary.slave_channel
    );
    println!(
        "communication events: {} ({} retransmissions)",
        summary.event_count, summary.retransmissions
    );
    match summary.disconnect_time {
        Some(t) => println!(
            "disconnected at {:.4}s simulated ({:.2}s original scale)",
            t,
            t * config.speedup
        ),
        None => println!(
            "duration elapsed after {:.2}s simulated",
            summary.sim_time
        ),
    }

    // Stable contract: the final stdout line is the bare event count.
    println!("{}", summary.event_count);
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<CliArgs, String> {
    let mut config = SimConfig::default();
    let mut real_time = false;

    while let Some(flag) = args.next() {
        match flag.as_str() {
            "--initial-error" => config.initial_error_rate = parse_value(&flag, args.next())?,
            "--max-error" => config.max_error_rate = parse_value(&flag, args.next())?,
            "--merge-success" => config.merge_success_rate = parse_value(&flag, args.next())?,
            "--duration" => config.duration_secs = parse_value(&flag, args.next())?,
            "--algorithm" => {
                let id: u32 = parse_value(&flag, args.next())?;
                config.algorithm = Algorithm::from_id(id)
                    .ok_or_else(|| ConfigError::UnknownAlgorithm { id }.to_string())?;
            }
            "--seed" => {
                let hex = args
                    .next()
                    .ok_or_else(|| format!("{} requires a value", flag))?;
                config.seed = Some(parse_seed_hex(&hex)?);
            }
            "--real-time" => real_time = true,
            "--help" | "-h" => {
                print_usage();
                process::exit(0);
            }
            other => return Err(format!("unknown flag: {}", other)),
        }
    }

    // Fail fast on out-of-range values before any state is created.
    config.build_params().map_err(|e| e.to_string())?;

    Ok(CliArgs { config, real_time })
}

fn parse_value<T: std::str::FromStr>(flag: &str, value: Option<String>) -> Result<T, String> {
    let value = value.ok_or_else(|| format!("{} requires a value", flag))?;
    value
        .parse()
        .map_err(|_| format!("invalid value for {}: {}", flag, value))
}

fn parse_seed_hex(hex: &str) -> Result<[u8; 32], String> {
    let hex = hex.strip_prefix("0x").unwrap_or(hex);
    let mut seed = [0u8; 32];

    for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
        if i >= 32 {
            break;
        }
        let byte_str =
            std::str::from_utf8(chunk).map_err(|_| "invalid hex seed".to_string())?;
        seed[i] = u8::from_str_radix(byte_str, 16)
            .map_err(|e| format!("invalid hex seed: {}", e))?;
    }

    Ok(seed)
}

fn print_usage() {
    eprintln!("Usage: chmap-sim [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --initial-error <0..1>   initial packet error rate (default 0.1)");
    eprintln!("  --max-error <0..1>       maximum packet error rate (default 0.5)");
    eprintln!("  --merge-success <0..1>   cross-channel reception probability (default 0.5)");
    eprintln!("  --duration <seconds>     run duration, original time scale (default 60)");
    eprintln!("  --algorithm <1|2>        1: time-triggered, 2: Ack2-gated (default 1)");
    eprintln!("  --seed <hex>             32-byte random seed for reproducible runs");
    eprintln!("  --real-time              pace ticks with wall-clock sleeps");
}
