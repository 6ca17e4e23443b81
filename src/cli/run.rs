use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use log::info;

use ckrm_sched::event::EventLog;
use ckrm_sched::sim::{SimConfig, Simulation};
use ckrm_sched::tuning::{SchedTunables, CPU_DEMAND_CAL_THRESHOLD_NS, NSEC_PER_SEC};
use ckrm_sched::workload::{load_workload, ClassSpec};

use super::SHUTDOWN;
use crate::RunArgs;

// A SLICE LONGER THAN ONE DEMAND WINDOW SMEARS EVERY SAMPLE
const MAX_SLICE_NS: u64 = CPU_DEMAND_CAL_THRESHOLD_NS;

fn collect_specs(args: &RunArgs) -> Result<Vec<ClassSpec>> {
    let mut specs = match &args.workload {
        Some(path) => load_workload(path)?,
        None => Vec::new(),
    };
    for s in &args.classes {
        let spec = ClassSpec::parse(s)?;
        if specs.iter().any(|c| c.name == spec.name) {
            bail!("duplicate class '{}'", spec.name);
        }
        specs.push(spec);
    }
    if specs.is_empty() {
        bail!("no classes: pass --class NAME:WEIGHT or --workload FILE");
    }
    Ok(specs)
}

fn write_trace(log: &EventLog, path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("creating trace {}", path.display()))?;
    let mut enc = GzEncoder::new(BufWriter::new(file), Compression::default());
    log.write_csv(&mut enc)
        .with_context(|| format!("writing trace {}", path.display()))?;
    enc.finish()?;
    Ok(())
}

fn print_shares(sim: &Simulation) {
    println!("\n{:<16} {:<8} {:<14} {:<8}", "CLASS", "WEIGHT", "RECEIVED_MS", "SHARE");
    println!("{}", "-".repeat(50));
    for u in sim.usage() {
        println!("{:<16} {:<8} {:<14} {:.1}%",
            u.name, u.weight, u.received_ns / 1_000_000, u.share_pct);
    }
}

pub fn run(args: &RunArgs, tunables: &SchedTunables) -> Result<()> {
    if args.cpus == 0 {
        bail!("--cpus must be at least 1");
    }
    if args.slice_ns == 0 || args.tick_ns == 0 {
        bail!("--slice-ns and --tick-ns must be non-zero");
    }
    if args.slice_ns > MAX_SLICE_NS {
        bail!("--slice-ns {} exceeds the {}ns demand window", args.slice_ns, MAX_SLICE_NS);
    }

    let specs = collect_specs(args)?;
    let cfg = SimConfig {
        nr_cpus: args.cpus,
        slice_ns: args.slice_ns,
        tick_ns: args.tick_ns,
        tunables: *tunables,
    };
    let mut sim = Simulation::new(cfg, &specs)?;

    println!("CKRM-SCHED");
    println!("CPUS:            {}", args.cpus);
    println!("CLASSES:         {}", specs.len());
    println!("SLICE:           {} ns (tick={} ns)", args.slice_ns, args.tick_ns);
    println!("CLASSQUEUE:      {} slots, quantizer {}", tunables.classqueue_size, tunables.class_quantizer);
    println!("MAX SAVINGS:     {} ns", tunables.max_savings);
    println!("PID:             kp={} ki={} kd={}", tunables.kp, tunables.ki, tunables.kd);
    if args.duration == 0 {
        println!("DURATION:        UNTIL CTRL+C");
    } else {
        println!("DURATION:        {}s", args.duration);
    }
    println!();

    let mut second = 0u64;
    loop {
        if SHUTDOWN.load(Ordering::Relaxed) || (args.duration != 0 && second >= args.duration) {
            break;
        }
        let started = Instant::now();
        sim.run_for(NSEC_PER_SEC, Some(&SHUTDOWN))?;
        second += 1;

        let sched = sim.scheduler();
        let mut line = format!("t={:<5}", second);
        for cpu in 0..sched.nr_cpus() {
            let est = sched.load_estimator(cpu)?;
            line.push_str(&format!(" cpu{}: load {:<4} pressure {:<5}",
                cpu, est.load_p, est.pressure(sched.tunables())));
        }
        println!("{}", line);
        for u in sim.usage() {
            println!("  {:<16} share {:>5.1}%", u.name, u.share_pct);
        }

        if args.pace {
            if let Some(rest) = Duration::from_secs(1).checked_sub(started.elapsed()) {
                std::thread::sleep(rest);
            }
        }
    }

    println!("\nCKRM-SCHED IS SHUTTING DOWN");

    print_shares(&sim);
    if args.report {
        for c in sim.classes() {
            println!("{}", sim.scheduler().class_report(c.id)?);
        }
    }
    if args.dump_log {
        sim.log.dump();
    }
    sim.log.summary();

    if let Some(path) = &args.trace {
        write_trace(&sim.log, path)?;
        info!("trace written to {}", path.display());
    }

    println!("CKRM-SCHED OUT.");
    Ok(())
}
