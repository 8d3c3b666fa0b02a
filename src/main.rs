use anyhow::{Context, Result};
use rand::Rng;

use riskmart::config::AuditConfig;
use riskmart::logging::{self, obj, v_num, v_str, Domain, Level};
use riskmart::persist::{self, RoundSnapshot};
use riskmart::report;
use riskmart::simulate::{run_simulated_audit, SimulationSpec};

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn parse_votes(s: &str) -> Result<Vec<usize>> {
    s.split(',')
        .map(|v| v.trim().parse::<usize>().with_context(|| format!("bad vote count {:?}", v)))
        .collect()
}

fn main() -> Result<()> {
    let cfg = AuditConfig::from_env();
    cfg.validate()?;

    let votes = parse_votes(&std::env::var("RLA_VOTES").unwrap_or_else(|_| "5200,4800".to_string()))?;
    let total: usize = votes.iter().sum();
    let spec = SimulationSpec {
        contest_id: env_or("RLA_CONTEST_ID", 1),
        undervotes: env_or("RLA_UNDERVOTES", 0),
        phantoms: env_or("RLA_PHANTOMS", 0),
        fuzz_pct: env_or("RLA_FUZZ_PCT", 0.001),
        max_samples: env_or("RLA_MAX_SAMPLES", total),
        votes,
    };
    let seed: u64 = env_or("RLA_SEED", rand::thread_rng().gen());

    logging::log(
        Level::Info,
        Domain::System,
        "startup",
        obj(&[
            ("contest_id", v_num(spec.contest_id as f64)),
            ("seed", v_str(&seed.to_string())),
            ("risk_limit", v_num(cfg.risk_limit)),
            ("max_loss", v_num(cfg.max_loss)),
            ("fuzz_pct", v_num(spec.fuzz_pct)),
        ]),
    );

    let result = run_simulated_audit(&spec, &cfg, seed)?;
    print!("{}", report::result_summary(spec.contest_id, &result, cfg.risk_limit));
    print!("{}", report::error_counts_table(&result.tracker.error_counts()));

    if let Ok(dir) = std::env::var("RLA_SNAPSHOT_DIR") {
        let round: u32 = env_or("RLA_ROUND", 1);
        let snapshot = RoundSnapshot::new(spec.contest_id, round, result);
        let path = persist::write_snapshot(std::path::Path::new(&dir), &snapshot)?;
        println!("snapshot: {}", path.display());
    }
    Ok(())
}
