use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{bail, Context, Result};

use ckrm_sched::tuning::{SchedTunables, CKRM_MAX_WEIGHT};
use ckrm_sched::workload::load_workload;
use ckrm_sched::Scheduler;

use crate::CheckArgs;

const TRACE_COLUMNS: usize = 8;

fn check_tunables(t: &SchedTunables) -> bool {
    match Scheduler::new(1, *t) {
        Ok(_) => {
            println!("  TUNABLES              OK");
            true
        }
        Err(e) => {
            println!("  TUNABLES              REJECTED ({})", e);
            false
        }
    }
}

fn check_workload(path: &Path) -> bool {
    let specs = match load_workload(path) {
        Ok(s) => s,
        Err(e) => {
            println!("  {:<22}INVALID ({:#})", path.display(), e);
            return false;
        }
    };
    for s in &specs {
        println!("  {:<16} weight {:<5} demand {:>3}% guarantee {}",
            s.name, s.weight, s.demand_pct, s.guarantee);
    }
    let total: u64 = specs.iter().map(|s| s.weight as u64).sum();
    println!("  {} CLASSES, TOTAL WEIGHT {} ({:.2} CPUS OF SHARES)",
        specs.len(), total, total as f64 / CKRM_MAX_WEIGHT as f64);
    !specs.is_empty()
}

// COUNT ROWS OF A GZIP CSV TRACE, REJECTING MALFORMED ONES
fn read_trace(path: &Path) -> Result<usize> {
    let file = File::open(path)
        .with_context(|| format!("opening trace {}", path.display()))?;
    let reader = BufReader::new(flate2::read::GzDecoder::new(file));
    let mut rows = 0;
    for (i, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("decompressing trace {}", path.display()))?;
        let cols = line.split(',').count();
        if cols != TRACE_COLUMNS {
            bail!("line {}: {} columns, want {}", i + 1, cols, TRACE_COLUMNS);
        }
        if i > 0 {
            rows += 1;
        }
    }
    Ok(rows)
}

pub fn run_check(args: &CheckArgs, tunables: &SchedTunables) -> Result<()> {
    println!("CKRM-SCHED CONFIGURATION CHECK");
    println!();

    let mut ok = check_tunables(tunables);

    if let Some(path) = &args.workload {
        println!();
        println!("WORKLOAD:");
        if !check_workload(path) {
            ok = false;
        }
    }

    if let Some(path) = &args.trace {
        println!();
        match read_trace(path) {
            Ok(rows) => println!("  TRACE                 OK ({} SNAPSHOTS)", rows),
            Err(e) => {
                println!("  TRACE                 INVALID ({:#})", e);
                ok = false;
            }
        }
    }
    println!();

    if ok {
        println!("ALL CHECKS PASSED");
    } else {
        println!("SOME CHECKS FAILED");
        std::process::exit(1);
    }

    Ok(())
}
