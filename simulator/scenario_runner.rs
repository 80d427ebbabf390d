// Scenario Runner - sweep loss-rate scenarios and compare both algorithms
//
// Usage:
//   cargo run --bin scenario_runner                      (built-in sweep)
//   cargo run --bin scenario_runner scenarios/sweep.yaml
//   cargo run --bin scenario_runner scenarios/sweep.yaml --seed 0x1234...
//
// Runs every (initial-error, max-error, algorithm) combination of the sweep
// N times in-process, prints per-scenario statistics, and writes a CSV
// summary alongside.

use std::env;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::process;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use cm_sim::{Algorithm, NoOpSink, SimConfig, Simulator};

/// Scenario sweep file format
#[derive(Debug, serde::Deserialize)]
struct ScenarioFile {
    /// Scenario metadata
    #[serde(default)]
    meta: ScenarioMeta,

    /// Sweep configuration
    sweep: SweepConfig,
}

#[derive(Debug, Default, serde::Deserialize)]
struct ScenarioMeta {
    name: Option<String>,
    description: Option<String>,
    hypothesis: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct SweepConfig {
    initial_errors: RangeSpec,
    max_errors: RangeSpec,

    #[serde(default = "default_algorithms")]
    algorithms: Vec<u32>,

    #[serde(default = "default_runs")]
    runs_per_scenario: usize,

    #[serde(default = "default_duration")]
    duration_secs: f64,

    #[serde(default = "default_merge_success")]
    merge_success: f64,

    #[serde(default = "default_speedup")]
    speedup: f64,

    #[serde(default)]
    csv_path: Option<String>,
}

/// Inclusive floating-point range with a fixed step.
#[derive(Debug, serde::Deserialize)]
struct RangeSpec {
    start: f64,
    end: f64,
    step: f64,
}

impl RangeSpec {
    /// Materialize the range, rounding to two decimals so accumulated
    /// floating-point drift never drops the endpoint.
    fn values(&self) -> Vec<f64> {
        let mut values = Vec::new();
        let mut current = self.start;
        while current <= self.end + 1e-9 {
            values.push((current * 100.0).round() / 100.0);
            current += self.step;
        }
        values
    }
}

fn default_algorithms() -> Vec<u32> {
    vec![1, 2]
}

fn default_runs() -> usize {
    3
}

fn default_duration() -> f64 {
    120.0
}

fn default_merge_success() -> f64 {
    0.5
}

fn default_speedup() -> f64 {
    5.0
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            initial_errors: RangeSpec { start: 0.5, end: 0.7, step: 0.05 },
            max_errors: RangeSpec { start: 0.7, end: 0.9, step: 0.05 },
            algorithms: default_algorithms(),
            runs_per_scenario: default_runs(),
            duration_secs: default_duration(),
            merge_success: default_merge_success(),
            speedup: default_speedup(),
            csv_path: None,
        }
    }
}

fn main() {
    let args: Vec<String> = env::args().collect();

    let mut path: Option<&str> = None;
    let mut seed: Option<[u8; 32]> = None;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--seed" => {
                if i + 1 >= args.len() {
                    eprintln!("--seed requires a value");
                    process::exit(1);
                }
                seed = Some(parse_seed_hex(&args[i + 1]));
                i += 2;
            }
            other => {
                path = Some(other);
                i += 1;
            }
        }
    }

    let (meta, sweep) = match path {
        Some(path) => load_scenario_file(Path::new(path)),
        None => (ScenarioMeta::default(), SweepConfig::default()),
    };

    println!("\n╔════════════════════════════════════════════════════════╗");
    match &meta.name {
        Some(name) => println!("║  {}", name),
        None => println!("║  SCENARIO RUNNER - Algorithm Comparison Sweep"),
    }
    println!("╚════════════════════════════════════════════════════════╝\n");

    if let Some(ref desc) = meta.description {
        println!("{}\n", desc);
    }
    if let Some(ref hypothesis) = meta.hypothesis {
        println!("Hypothesis:");
        println!("  {}\n", hypothesis);
    }

    let initial_errors = sweep.initial_errors.values();
    let max_errors = sweep.max_errors.values();
    println!("Initial error rates: {:?}", initial_errors);
    println!("Max error rates:     {:?}", max_errors);
    println!(
        "Algorithms: {:?}, {} run(s) per scenario, duration {}s\n",
        sweep.algorithms, sweep.runs_per_scenario, sweep.duration_secs
    );

    // Seeded sweeps derive one sub-seed per run so reruns reproduce exactly.
    let mut seed_source = seed.map(StdRng::from_seed);

    let valid_pairs: usize = initial_errors
        .iter()
        .map(|ie| max_errors.iter().filter(|me| *ie <= **me).count())
        .sum();
    let total_scenarios = valid_pairs * sweep.algorithms.len();

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let csv_path = sweep
        .csv_path
        .clone()
        .unwrap_or_else(|| format!("algorithm_comparison_{}.csv", timestamp));
    let mut csv = match fs::File::create(&csv_path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to create {}: {}", csv_path, e);
            process::exit(1);
        }
    };
    write_csv_header(&mut csv, sweep.runs_per_scenario);

    let mut current = 0;
    for &initial_error in &initial_errors {
        for &max_error in &max_errors {
            if initial_error > max_error {
                continue;
            }
            for &algorithm_id in &sweep.algorithms {
                let Some(algorithm) = Algorithm::from_id(algorithm_id) else {
                    eprintln!("Skipping unknown algorithm id {}", algorithm_id);
                    continue;
                };
                current += 1;

                println!("{}", "=".repeat(60));
                println!("Scenario {}/{}", current, total_scenarios);
                println!(
                    "initial {:.2} | max {:.2} | algorithm {}",
                    initial_error, max_error, algorithm_id
                );
                println!("{}", "-".repeat(60));

                let mut results = Vec::new();
                for run in 1..=sweep.runs_per_scenario {
                    let config = SimConfig {
                        initial_error_rate: initial_error,
                        max_error_rate: max_error,
                        merge_success_rate: sweep.merge_success,
                        algorithm,
                        duration_secs: sweep.duration_secs,
                        speedup: sweep.speedup,
                        seed: seed_source.as_mut().map(|rng| rng.gen()),
                    };

                    let mut sim = match Simulator::new(&config, NoOpSink) {
                        Ok(sim) => sim,
                        Err(e) => {
                            eprintln!("Invalid scenario configuration: {}", e);
                            process::exit(1);
                        }
                    };
                    let count = sim.run();
                    results.push(count);

                    let disconnected = sim.summary().disconnected;
                    println!(
                        "  run {}/{}: {} events{}",
                        run,
                        sweep.runs_per_scenario,
                        count,
                        if disconnected { " (disconnected)" } else { "" }
                    );
                }

                let stats = ScenarioStats::from(&results);
                println!("{}", "-".repeat(60));
                println!(
                    "  avg {:.2} | min {} | max {}",
                    stats.avg, stats.min, stats.max
                );
                println!("{}\n", "=".repeat(60));

                write_csv_row(&mut csv, initial_error, max_error, algorithm_id, &results, &stats);
            }
        }
    }

    println!("Sweep complete. Results written to {}", csv_path);
}

struct ScenarioStats {
    avg: f64,
    min: u64,
    max: u64,
}

impl ScenarioStats {
    fn from(results: &[u64]) -> Self {
        let min = results.iter().copied().min().unwrap_or(0);
        let max = results.iter().copied().max().unwrap_or(0);
        let avg = if results.is_empty() {
            0.0
        } else {
            results.iter().sum::<u64>() as f64 / results.len() as f64
        };
        Self { avg, min, max }
    }
}

fn write_csv_header(csv: &mut fs::File, runs: usize) {
    let mut header = String::from("initial_error,max_error,algorithm");
    for run in 1..=runs {
        header.push_str(&format!(",events_run{}", run));
    }
    header.push_str(",avg,min,max");
    if let Err(e) = writeln!(csv, "{}", header) {
        eprintln!("Failed to write CSV header: {}", e);
        process::exit(1);
    }
}

fn write_csv_row(
    csv: &mut fs::File,
    initial_error: f64,
    max_error: f64,
    algorithm_id: u32,
    results: &[u64],
    stats: &ScenarioStats,
) {
    let mut row = format!("{},{},{}", initial_error, max_error, algorithm_id);
    for count in results {
        row.push_str(&format!(",{}", count));
    }
    row.push_str(&format!(",{:.2},{},{}", stats.avg, stats.min, stats.max));
    if let Err(e) = writeln!(csv, "{}", row) {
        eprintln!("Failed to write CSV row: {}", e);
        process::exit(1);
    }
}

fn load_scenario_file(path: &Path) -> (ScenarioMeta, SweepConfig) {
    println!("Loading scenario from: {}", path.display());

    let yaml_content = fs::read_to_string(path).unwrap_or_else(|e| {
        eprintln!("Failed to read {}: {}", path.display(), e);
        process::exit(1);
    });

    let scenario: ScenarioFile = serde_yaml::from_str(&yaml_content).unwrap_or_else(|e| {
        eprintln!("Failed to parse {}: {}", path.display(), e);
        process::exit(1);
    });

    (scenario.meta, scenario.sweep)
}

fn parse_seed_hex(hex: &str) -> [u8; 32] {
    let hex = hex.strip_prefix("0x").unwrap_or(hex);
    let mut seed = [0u8; 32];

    for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
        if i >= 32 {
            break;
        }
        let byte_str = std::str::from_utf8(chunk).unwrap_or_else(|_| {
            eprintln!("Invalid hex seed");
            process::exit(1);
        });
        seed[i] = u8::from_str_radix(byte_str, 16).unwrap_or_else(|e| {
            eprintln!("Invalid hex seed: {}", e);
            process::exit(1);
        });
    }

    seed
}
