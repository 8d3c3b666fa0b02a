//! Estimate the sample size an audit needs by running many simulated audits
//! of the same contest in parallel.
//!
//! `RLA_MODE=ballots` (default) fuzzes simulated ballots; `RLA_MODE=rates`
//! draws comparison values from the historical error rate table.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use anyhow::{anyhow, Result};

use riskmart::config::AuditConfig;
use riskmart::martingale::{TestH0Result, TestH0Status};
use riskmart::simulate::{quantile, run_rate_table_audit, run_simulated_audit, SimulationSpec};

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn main() -> Result<()> {
    println!("=== SIMULATED SAMPLE SIZES ===\n");

    let cfg = AuditConfig::from_env();
    cfg.validate()?;

    let mode: String = env_or("RLA_MODE", "ballots".to_string());
    let run_trial: fn(&SimulationSpec, &AuditConfig, u64) -> riskmart::Result<TestH0Result> = match mode.as_str() {
        "ballots" => run_simulated_audit,
        "rates" => run_rate_table_audit,
        other => return Err(anyhow!("unknown RLA_MODE {:?} (expected ballots or rates)", other)),
    };

    let n_threads = num_cpus::get().min(8);
    let n_trials: usize = env_or("RLA_TRIALS", 200);
    let base_seed: u64 = env_or("RLA_SEED", 12345);
    let margin_votes: usize = env_or("RLA_WINNER_VOTES", 5100);
    let loser_votes: usize = env_or("RLA_LOSER_VOTES", 4900);

    let spec = SimulationSpec {
        contest_id: 1,
        votes: vec![margin_votes, loser_votes],
        undervotes: env_or("RLA_UNDERVOTES", 0),
        phantoms: env_or("RLA_PHANTOMS", 0),
        fuzz_pct: env_or("RLA_FUZZ_PCT", 0.001),
        max_samples: margin_votes + loser_votes,
    };

    println!("Mode: {}", mode);
    println!("Threads: {}", n_threads);
    println!("Trials: {}", n_trials);
    println!("Votes: {:?}  fuzz: {}", spec.votes, spec.fuzz_pct);
    println!();

    let sizes = Arc::new(Mutex::new(Vec::with_capacity(n_trials)));
    let failures = Arc::new(AtomicU64::new(0));
    let start = Instant::now();

    let mut handles = vec![];
    for t in 0..n_threads {
        let cfg = cfg.clone();
        let spec = spec.clone();
        let sizes = Arc::clone(&sizes);
        let failures = Arc::clone(&failures);

        handles.push(thread::spawn(move || -> riskmart::Result<()> {
            for trial in (t..n_trials).step_by(n_threads) {
                let result = run_trial(&spec, &cfg, base_seed + trial as u64)?;
                if result.status == TestH0Status::StatRejectNull {
                    if let Ok(mut v) = sizes.lock() {
                        v.push(result.sample_count);
                    }
                } else {
                    failures.fetch_add(1, Ordering::Relaxed);
                }
            }
            Ok(())
        }));
    }

    for h in handles {
        h.join().map_err(|_| anyhow!("trial thread panicked"))??;
    }

    let mut sizes = sizes.lock().map_err(|_| anyhow!("sample size lock poisoned"))?.clone();
    sizes.sort_unstable();

    println!("{:>10} {:>10}", "quantile", "samples");
    println!("{}", "-".repeat(21));
    for q in [0.5, 0.8, 0.9, 0.95, 0.99] {
        if let Some(n) = quantile(&sizes, q) {
            println!("{:>10.2} {:>10}", q, n);
        }
    }

    println!("\n=== Summary ===");
    println!("Total time: {:.2?}", start.elapsed());
    println!("Rejected: {}", sizes.len());
    println!("Not rejected: {}", failures.load(Ordering::Relaxed));
    Ok(())
}
