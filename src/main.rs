// CKRM-SCHED -- CLASS-BASED PROPORTIONAL-SHARE CPU SCHEDULER CORE
// DRIVES THE CORE AGAINST A SYNTHETIC HOST AND REPORTS PER-CLASS SHARES
//
// SCHEDULING DECISIONS HAPPEN IN THE LIBRARY (ckrm_sched)
// THIS BINARY HANDLES: CONFIGURATION, SIMULATION, TELEMETRY, TRACES

mod cli;

use std::path::PathBuf;
use std::sync::atomic::Ordering;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use ckrm_sched::tuning::{
    SchedTunables, CLASSQUEUE_SIZE, CLASS_QUANTIZER, CVT_STARVATION_INC_LIMIT,
    CVT_UPDATE_TICK_NS, INTERACTIVE_BONUS_NS, MAX_SAVINGS, NSEC_PER_MS, PID_KD, PID_KI, PID_KP,
    SKEW_FLOOR_WEIGHT,
};

use cli::SHUTDOWN;

#[derive(Parser)]
#[command(name = "ckrm-sched")]
#[command(about = "CKRM -- CLASS-BASED PROPORTIONAL-SHARE CPU SCHEDULER")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    // SIMULATE A WORKLOAD AND PRINT PER-SECOND TELEMETRY
    Run(RunArgs),
    // VALIDATE A WORKLOAD FILE AND/OR A RECORDED TRACE
    Check(CheckArgs),
}

#[derive(Args)]
pub struct TunableArgs {
    // CLASS QUEUE SLOTS PER CPU (POWER OF TWO)
    #[arg(long, default_value_t = CLASSQUEUE_SIZE)]
    classqueue_size: usize,

    // CVT -> PRIORITY SHIFT
    #[arg(long, default_value_t = CLASS_QUANTIZER)]
    class_quantizer: u32,

    // SAVINGS CAP IN NANOSECONDS (4S DEFAULT)
    #[arg(long, default_value_t = MAX_SAVINGS)]
    max_savings: u64,

    // REACTIVATION HEADROOM IN NANOSECONDS (200MS DEFAULT)
    #[arg(long, default_value_t = INTERACTIVE_BONUS_NS)]
    interactive_bonus_ns: u64,

    // CVT INCREMENT CEILING PER UNIT OF WEIGHT BEFORE THE SKEW GUARD KICKS IN
    #[arg(long, default_value_t = CVT_STARVATION_INC_LIMIT)]
    starvation_inc_limit: u64,

    // WEIGHTS BELOW THIS ARE ACCOUNTED AS SKEWED
    #[arg(long, default_value_t = SKEW_FLOOR_WEIGHT)]
    skew_floor_weight: u32,

    // PID GAINS (PERCENT)
    #[arg(long, default_value_t = PID_KP)]
    kp: i64,
    #[arg(long, default_value_t = PID_KI)]
    ki: i64,
    #[arg(long, default_value_t = PID_KD)]
    kd: i64,
}

impl TunableArgs {
    fn tunables(&self) -> SchedTunables {
        SchedTunables {
            classqueue_size: self.classqueue_size,
            class_quantizer: self.class_quantizer,
            max_savings: self.max_savings,
            interactive_bonus_ns: self.interactive_bonus_ns,
            starvation_inc_limit: self.starvation_inc_limit,
            skew_floor_weight: self.skew_floor_weight,
            kp: self.kp,
            ki: self.ki,
            kd: self.kd,
        }
    }
}

#[derive(Args)]
pub struct RunArgs {
    #[command(flatten)]
    tunables: TunableArgs,

    // SIMULATED CPUS
    #[arg(long, default_value_t = 1)]
    cpus: usize,

    // SIMULATED SECONDS (0 = UNTIL CTRL+C)
    #[arg(long, default_value_t = 10)]
    duration: u64,

    // SLICE IN NANOSECONDS (1MS DEFAULT)
    #[arg(long, default_value_t = NSEC_PER_MS)]
    slice_ns: u64,

    // HOUSEKEEPING PERIOD IN NANOSECONDS (100MS DEFAULT)
    #[arg(long, default_value_t = CVT_UPDATE_TICK_NS)]
    tick_ns: u64,

    // CLASS AS NAME:WEIGHT[:DEMAND_PCT[:GUARANTEE]] (REPEATABLE)
    #[arg(long = "class")]
    classes: Vec<String>,

    // WORKLOAD FILE, ONE CLASS SPEC PER LINE
    #[arg(long)]
    workload: Option<PathBuf>,

    // WRITE THE EVENT LOG AS GZIP CSV
    #[arg(long)]
    trace: Option<PathBuf>,

    // DUMP FULL EVENT LOG ON EXIT
    #[arg(long)]
    dump_log: bool,

    // PRINT PER-CLASS STATUS BLOCKS ON EXIT
    #[arg(long)]
    report: bool,

    // ONE SIMULATED SECOND PER WALL SECOND
    #[arg(long)]
    pace: bool,

    // PRINT VERBOSE OUTPUT
    #[arg(long)]
    verbose: bool,
}

#[derive(Args)]
pub struct CheckArgs {
    #[command(flatten)]
    tunables: TunableArgs,

    #[arg(long)]
    workload: Option<PathBuf>,

    // GZIP CSV TRACE WRITTEN BY `run --trace`
    #[arg(long)]
    trace: Option<PathBuf>,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp(None)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => {
            init_logging(args.verbose);
            ctrlc::set_handler(move || {
                SHUTDOWN.store(true, Ordering::Relaxed);
            })?;
            cli::run::run(&args, &args.tunables.tunables())
        }
        Command::Check(args) => {
            init_logging(false);
            cli::check::run_check(&args, &args.tunables.tunables())
        }
    }
}
