// CKRM HOST SIMULATOR
// STANDS IN FOR THE HOST SCHEDULER: DRIVES A Scheduler WITH SYNTHETIC CLASSES
// IN FIXED SLICES AND RECORDS WHO GOT THE CPU.
//
// EVERY CLASS HAS WORK ON EVERY CPU. EACH SLICE IT EARNS
// slice * demand_pct / 100 NS OF WORK PER CPU (BACKLOG CAPPED AT TWO SLICES).
// IT IS RUNNABLE WHILE IT HOLDS AT LEAST ONE SLICE OF WORK.
//
// PER SLICE, PER CPU:
//   next_class -> RUN ONE SLICE -> on_task_switch_out -> on_class_idle IF DRAINED
// EVERY tick_ns: on_periodic_tick ON EVERY CPU, ONE EventLog SNAPSHOT.
//
// FULLY DETERMINISTIC. NO WALL-CLOCK INPUT.

use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;

use crate::error::SchedResult;
use crate::event::{EventLog, Snapshot};
use crate::registry::ClassId;
use crate::scheduler::Scheduler;
use crate::tuning::{SchedTunables, CVT_UPDATE_TICK_NS, NSEC_PER_MS};
use crate::workload::ClassSpec;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SimConfig {
    pub nr_cpus:  usize,
    pub slice_ns: u64,
    pub tick_ns:  u64,
    pub tunables: SchedTunables,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            nr_cpus: 1,
            slice_ns: NSEC_PER_MS,
            tick_ns: CVT_UPDATE_TICK_NS,
            tunables: SchedTunables::default(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SimClass {
    pub id:          ClassId,
    pub spec:        ClassSpec,
    pub received_ns: u64,
    pending:         Vec<u64>,
    runnable:        Vec<bool>,
}

// ONE LINE OF THE FAIRNESS REPORT
#[derive(Clone, Debug, PartialEq)]
pub struct ClassUsage {
    pub id:          ClassId,
    pub name:        String,
    pub weight:      u32,
    pub received_ns: u64,
    pub share_pct:   f64,
}

pub struct Simulation {
    cfg:          SimConfig,
    sched:        Scheduler,
    classes:      Vec<SimClass>,
    now_ns:       u64,
    next_tick_ns: u64,
    switches:     u64,   // SINCE LAST SNAPSHOT
    idle_slices:  u64,
    pub log:      EventLog,
}

impl Simulation {
    pub fn new(cfg: SimConfig, specs: &[ClassSpec]) -> SchedResult<Self> {
        let sched = Scheduler::new(cfg.nr_cpus, cfg.tunables)?;
        let mut classes = Vec::with_capacity(specs.len());
        for spec in specs {
            let id = sched.on_class_created(&spec.name, spec.shares())?;
            classes.push(SimClass {
                id,
                spec: spec.clone(),
                received_ns: 0,
                pending: vec![0; cfg.nr_cpus],
                runnable: vec![false; cfg.nr_cpus],
            });
        }
        Ok(Self {
            cfg,
            sched,
            classes,
            now_ns: 0,
            next_tick_ns: cfg.tick_ns,
            switches: 0,
            idle_slices: 0,
            log: EventLog::new(),
        })
    }

    pub fn scheduler(&self) -> &Scheduler { &self.sched }
    pub fn classes(&self) -> &[SimClass] { &self.classes }
    pub fn now_ns(&self) -> u64 { self.now_ns }
    pub fn config(&self) -> &SimConfig { &self.cfg }

    // ONE SLICE ON EVERY CPU
    pub fn step(&mut self) -> SchedResult<()> {
        let slice = self.cfg.slice_ns;
        let now = self.now_ns;

        // ARRIVALS
        for class in self.classes.iter_mut() {
            let earn = slice.saturating_mul(class.spec.demand_pct as u64) / 100;
            for cpu in 0..self.cfg.nr_cpus {
                class.pending[cpu] = class.pending[cpu].saturating_add(earn).min(slice.saturating_mul(2));
                if !class.runnable[cpu] && class.pending[cpu] >= slice {
                    class.runnable[cpu] = true;
                    self.sched.on_class_runnable(class.id, cpu, now)?;
                }
            }
        }

        // DISPATCH
        for cpu in 0..self.cfg.nr_cpus {
            let id = match self.sched.next_class(cpu)? {
                Some(id) => id,
                None => {
                    self.idle_slices += 1;
                    continue;
                }
            };
            let class = match self.classes.iter_mut().find(|c| c.id == id) {
                Some(c) => c,
                // A CLASS WITH NO SIMULATED WORK (THE DEFAULT CLASS) IS NEVER QUEUED
                None => continue,
            };
            let ran = class.pending[cpu].min(slice);
            self.sched.on_task_switch_out(id, cpu, ran)?;
            class.pending[cpu] -= ran;
            class.received_ns += ran;
            self.switches += 1;

            if class.pending[cpu] < slice {
                class.runnable[cpu] = false;
                self.sched.on_class_idle(id, cpu, now.saturating_add(ran))?;
            }
        }

        self.now_ns = self.now_ns.saturating_add(slice);
        if self.now_ns >= self.next_tick_ns {
            self.housekeeping()?;
            self.next_tick_ns = self.next_tick_ns.saturating_add(self.cfg.tick_ns);
        }
        Ok(())
    }

    fn housekeeping(&mut self) -> SchedResult<()> {
        let mut credited = 0;
        let mut queued = 0;
        for cpu in 0..self.cfg.nr_cpus {
            let idle = self.sched.current(cpu)?.is_none();
            let summary = self.sched.on_periodic_tick(cpu, idle, self.now_ns)?;
            credited += summary.credited;
            queued += self.sched.queued_classes(cpu)?.len() as u64;
        }
        let (busiest, max_pressure) = self.sched.busiest_cpu();

        self.log.record(Snapshot {
            sim_ns: self.now_ns,
            switches: self.switches,
            idle_slices: self.idle_slices,
            queued,
            max_pressure,
            busiest_cpu: busiest as u32,
            credited,
            ..Snapshot::default()
        });
        debug!("sim: t={}ms switches={} idle={} pressure={}@cpu{}",
               self.now_ns / NSEC_PER_MS, self.switches, self.idle_slices, max_pressure, busiest);
        self.switches = 0;
        self.idle_slices = 0;
        Ok(())
    }

    // ADVANCE BY duration_ns (ROUNDED UP TO WHOLE SLICES) OR UNTIL shutdown IS SET
    pub fn run_for(&mut self, duration_ns: u64, shutdown: Option<&AtomicBool>) -> SchedResult<()> {
        let end = self.now_ns.saturating_add(duration_ns);
        while self.now_ns < end {
            if shutdown.is_some_and(|s| s.load(Ordering::Relaxed)) {
                break;
            }
            self.step()?;
        }
        Ok(())
    }

    pub fn usage(&self) -> Vec<ClassUsage> {
        let total: u64 = self.classes.iter().map(|c| c.received_ns).sum();
        self.classes.iter()
            .map(|c| ClassUsage {
                id: c.id,
                name: c.spec.name.clone(),
                weight: c.spec.weight,
                received_ns: c.received_ns,
                share_pct: if total == 0 {
                    0.0
                } else {
                    c.received_ns as f64 / total as f64 * 100.0
                },
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_system_only_idles() {
        let mut sim = Simulation::new(SimConfig::default(), &[]).unwrap();
        sim.run_for(200 * NSEC_PER_MS, None).unwrap();
        assert_eq!(sim.now_ns(), 200 * NSEC_PER_MS);
        assert_eq!(sim.log.len(), 2);
        assert!(sim.log.iter_chronological().all(|s| s.switches == 0 && s.idle_slices == 100));
    }

    #[test]
    fn shutdown_flag_stops_early() {
        let stop = AtomicBool::new(true);
        let mut sim = Simulation::new(SimConfig::default(), &[ClassSpec::new("a", 512)]).unwrap();
        sim.run_for(NSEC_PER_MS * 50, Some(&stop)).unwrap();
        assert_eq!(sim.now_ns(), 0);
    }

    #[test]
    fn oversized_slice_saturates_instead_of_wrapping() {
        let cfg = SimConfig { slice_ns: u64::MAX / 2, ..SimConfig::default() };
        let mut sim = Simulation::new(cfg, &[ClassSpec::new("a", 512)]).unwrap();
        sim.step().unwrap();
        // FULL DEMAND EARNS A SATURATED SLICE / 100: NOT YET RUNNABLE
        assert_eq!(sim.classes()[0].pending[0], u64::MAX / 100);
        assert!(!sim.classes()[0].runnable[0]);
        assert_eq!(sim.now_ns(), u64::MAX / 2);

        sim.step().unwrap();
        sim.step().unwrap();
        assert_eq!(sim.now_ns(), u64::MAX);
        sim.run_for(NSEC_PER_MS, None).unwrap();
        assert_eq!(sim.now_ns(), u64::MAX);
    }
}
