// CKRM SCHEDULER CORE
// THE SURFACE THE HOST SCHEDULER TALKS TO: CLASS LIFECYCLE, RUNNABILITY,
// SWITCH-OUT ACCOUNTING, PERIODIC HOUSEKEEPING, AND THE OUTBOUND DECISIONS
// (NEXT CLASS, LOAD PRESSURE, REPORTS).
//
// LOCKING:
//   REGISTRY (RwLock)        READERS = WALKS, WRITERS = CLASS CREATE/DESTROY
//   CPU RUNQUEUE (Mutex)     ONE PER CPU. OWNS THE CLASS QUEUE, EVERY LOCAL
//                            RUNQUEUE ON THAT CPU, AND THE LOAD ESTIMATOR
//   CLASS STATS (Mutex)      total_ns AND DEMAND, FOLDED IN BY HOUSEKEEPING
//
//   ORDER: REGISTRY -> CPU RUNQUEUE -> CLASS STATS. NO PATH TAKES TWO CPU LOCKS.
//
// NOTHING HERE SLEEPS. ALLOCATION ONLY HAPPENS ON CLASS CREATE AND IN REPORTS.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use log::{debug, error, info};
use parking_lot::Mutex;

use crate::classqueue::ClassQueue;
use crate::cvt::{
    self, check_inactive_class, update_class_priority, update_local_cvt, CvtCharge,
    InactiveCheck, LocalRunQueue,
};
use crate::demand::DemandEvent;
use crate::error::{SchedResult, SchedulerInvariantError};
use crate::load::{self, LoadEstimator};
use crate::registry::{ClassId, ClassRegistry, ClassShares, CpuClass, DEFAULT_CLASS};
use crate::tuning::SchedTunables;

pub const DEFAULT_CLASS_NAME: &str = "default";

struct CpuRunqueue {
    classqueue: ClassQueue<ClassId>,
    lrqs:       HashMap<ClassId, LocalRunQueue>,
    load:       LoadEstimator,
    current:    Option<ClassId>,
}

impl CpuRunqueue {
    fn lrq(&self, id: ClassId) -> SchedResult<&LocalRunQueue> {
        self.lrqs.get(&id).ok_or(SchedulerInvariantError::UnknownClass(id))
    }

    // REFERENCE FOR A CLASS COMING BACK: THE LAGGARD AMONG QUEUED CLASSES,
    // OR THE LEADER WHEN NOTHING ELSE IS QUEUED
    fn reactivation_reference(&self) -> u64 {
        let queued = self.lrqs.values()
            .filter(|l| self.classqueue.is_queued(l.node()));
        match queued.map(|l| l.local_cvt()).min() {
            Some(min) => min,
            None => cvt::get_max_cvt(self.lrqs.values()),
        }
    }

    // REFERENCE FOR HOUSEKEEPING: THE RUNNING CLASS, OR THE LEADER WHEN IDLE
    fn housekeeping_reference(&self, idle: bool) -> u64 {
        match self.current {
            Some(id) if !idle => self.lrqs.get(&id)
                .map(|l| l.local_cvt())
                .unwrap_or_else(|| cvt::get_max_cvt(self.lrqs.values())),
            _ => cvt::get_max_cvt(self.lrqs.values()),
        }
    }
}

// WHAT ONE HOUSEKEEPING PASS DID ON A CPU
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub reference_cvt: u64,
    pub flushed_ns:    u64,
    pub advanced:      u32,
    pub credited:      u64,
    pub load:          i64,
    pub pressure:      i64,
}

// ONE (CLASS, CPU) PAIR AS SEEN FROM OUTSIDE
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocalSnapshot {
    pub cpu:           usize,
    pub local_cvt:     u64,
    pub savings:       u64,
    pub uncounted_ns:  u64,
    pub local_weight:  u32,
    pub top_priority:  u64,
    pub priority:      u64,
    pub real_priority: u64,
    pub index:         usize,
    pub need_repos:    bool,
    pub queued:        bool,
    pub cpu_demand:    u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassReport {
    pub id:         ClassId,
    pub name:       String,
    pub shares:     ClassShares,
    pub total_ns:   u64,
    pub cpu_demand: u64,
    pub locals:     Vec<LocalSnapshot>,
}

impl ClassReport {
    pub fn total_savings(&self) -> u64 {
        self.locals.iter().map(|l| l.savings).sum()
    }
}

impl fmt::Display for ClassReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "-------- CPU CLASS STATUS START ---------")?;
        writeln!(f, "  class= {} ({})", self.id, self.name)?;
        writeln!(f, "  weight= {} guarantee= {}", self.shares.weight, self.shares.guarantee)?;
        writeln!(f, "  total_ns= {}", self.total_ns)?;
        writeln!(f, "  cpu_demand= {}", self.cpu_demand)?;
        for l in &self.locals {
            writeln!(f, "  cpu{:<3} cvt= {:<12} savings= {:<12} prio= {:<8} index= {:<4} queued= {}{}",
                l.cpu, l.local_cvt, l.savings, l.priority, l.index, l.queued,
                if l.need_repos { " (repos)" } else { "" })?;
        }
        write!(f, "-------- CPU CLASS STATUS END ---------")
    }
}

pub struct Scheduler {
    tunables: SchedTunables,
    registry: ClassRegistry,
    cpus:     Box<[Mutex<CpuRunqueue>]>,
    next_id:  AtomicU32,
}

impl Scheduler {
    // BRINGS UP ONE CLASS QUEUE PER CPU AND THE DEFAULT CLASS
    pub fn new(nr_cpus: usize, tunables: SchedTunables) -> SchedResult<Self> {
        if nr_cpus == 0 {
            return Err(SchedulerInvariantError::InvalidCpu { cpu: 0, nr_cpus: 0 });
        }
        let mut cpus = Vec::with_capacity(nr_cpus);
        for _ in 0..nr_cpus {
            cpus.push(Mutex::new(CpuRunqueue {
                classqueue: ClassQueue::new(tunables.classqueue_size)?,
                lrqs: HashMap::new(),
                load: LoadEstimator::new(),
                current: None,
            }));
        }

        let sched = Self {
            tunables,
            registry: ClassRegistry::new(),
            cpus: cpus.into_boxed_slice(),
            next_id: AtomicU32::new(DEFAULT_CLASS.0),
        };
        let root = sched.on_class_created(DEFAULT_CLASS_NAME, ClassShares::default())?;
        debug_assert_eq!(root, DEFAULT_CLASS);

        info!("ckrm: {} cpus, classqueue size {}, max savings {}ns",
              nr_cpus, tunables.classqueue_size, tunables.max_savings);
        Ok(sched)
    }

    pub fn tunables(&self) -> &SchedTunables { &self.tunables }
    pub fn nr_cpus(&self) -> usize { self.cpus.len() }
    pub fn registry(&self) -> &ClassRegistry { &self.registry }

    fn cpu(&self, cpu: usize) -> SchedResult<&Mutex<CpuRunqueue>> {
        self.cpus.get(cpu).ok_or_else(|| {
            error!("ckrm: cpu {} out of range", cpu);
            SchedulerInvariantError::InvalidCpu { cpu, nr_cpus: self.cpus.len() }
        })
    }

    // --- INBOUND: CLASS LIFECYCLE ---

    pub fn on_class_created(&self, name: &str, shares: ClassShares) -> SchedResult<ClassId> {
        if shares.weight == 0 {
            error!("ckrm: class '{}' created with zero weight", name);
            return Err(SchedulerInvariantError::ZeroWeight);
        }
        let t = &self.tunables;

        let mut list = self.registry.write();
        let id = ClassId(self.next_id.fetch_add(1, Ordering::Relaxed));
        for rq in self.cpus.iter() {
            let mut rq = rq.lock();
            let node = rq.classqueue.insert_node(id);
            let lrq = LocalRunQueue::new(id, node, shares.weight, shares.guarantee, t)?;
            rq.lrqs.insert(id, lrq);
        }
        list.register(Arc::new(CpuClass::new(id, name, shares, self.cpus.len())));
        Ok(id)
    }

    pub fn on_class_destroyed(&self, id: ClassId) -> SchedResult<()> {
        let mut list = self.registry.write();
        list.unregister(id)?;
        for rq in self.cpus.iter() {
            let mut rq = rq.lock();
            if let Some(lrq) = rq.lrqs.remove(&id) {
                rq.classqueue.remove_node(lrq.node())?;
            }
            if rq.current == Some(id) {
                rq.current = None;
            }
        }
        Ok(())
    }

    pub fn set_class_shares(&self, id: ClassId, shares: ClassShares) -> SchedResult<()> {
        if shares.weight == 0 {
            return Err(SchedulerInvariantError::ZeroWeight);
        }
        let list = self.registry.read();
        let class = list.get(id).ok_or(SchedulerInvariantError::UnknownClass(id))?;
        for rq in self.cpus.iter() {
            let mut rq = rq.lock();
            let lrq = rq.lrqs.get_mut(&id).ok_or(SchedulerInvariantError::UnknownClass(id))?;
            lrq.set_weight(shares.weight, shares.guarantee, &self.tunables)?;
        }
        class.set_shares(shares);
        debug!("ckrm: class {} weight={} guarantee={}", id, shares.weight, shares.guarantee);
        Ok(())
    }

    // --- INBOUND: RUNNABILITY ---

    // FIRST TASK OF THE CLASS BECAME RUNNABLE ON `cpu`. NO-OP IF ALREADY QUEUED.
    pub fn on_class_runnable(&self, id: ClassId, cpu: usize, now_ns: u64) -> SchedResult<()> {
        let t = &self.tunables;
        let mut guard = self.cpu(cpu)?.lock();
        let reference = guard.reactivation_reference();
        let rq = &mut *guard;
        let lrq = rq.lrqs.get_mut(&id).ok_or(SchedulerInvariantError::UnknownClass(id))?;
        if rq.classqueue.is_queued(lrq.node()) {
            return Ok(());
        }

        lrq.demand.event(DemandEvent::Enqueue, now_ns);
        lrq.check_inactive(reference, t)?;
        rq.classqueue.enqueue(lrq.node(), lrq.effective_priority(t))
    }

    // LAST TASK OF THE CLASS LEFT `cpu`. THE CLASS MUST BE QUEUED.
    pub fn on_class_idle(&self, id: ClassId, cpu: usize, now_ns: u64) -> SchedResult<()> {
        let mut guard = self.cpu(cpu)?.lock();
        let rq = &mut *guard;
        let lrq = rq.lrqs.get_mut(&id).ok_or(SchedulerInvariantError::UnknownClass(id))?;
        rq.classqueue.dequeue(lrq.node())?;
        lrq.demand.event(DemandEvent::Dequeue, now_ns);
        if rq.current == Some(id) {
            rq.current = None;
        }
        Ok(())
    }

    // URGENCY OF THE CLASS'S MOST URGENT TASK ON `cpu`
    pub fn set_top_priority(&self, id: ClassId, cpu: usize, prio: u64) -> SchedResult<()> {
        let mut guard = self.cpu(cpu)?.lock();
        let rq = &mut *guard;
        let lrq = rq.lrqs.get_mut(&id).ok_or(SchedulerInvariantError::UnknownClass(id))?;
        lrq.set_top_priority(prio);
        update_class_priority(&mut rq.classqueue, lrq, &self.tunables)
    }

    // --- INBOUND: ACCOUNTING ---

    pub fn on_task_switch_out(&self, id: ClassId, cpu: usize, consumed_ns: u64) -> SchedResult<CvtCharge> {
        let mut guard = self.cpu(cpu)?.lock();
        let rq = &mut *guard;
        let lrq = rq.lrqs.get_mut(&id).ok_or(SchedulerInvariantError::UnknownClass(id))?;
        lrq.demand.event(DemandEvent::Deschedule(consumed_ns), 0);
        update_local_cvt(&mut rq.classqueue, lrq, consumed_ns, &self.tunables)
    }

    pub fn on_periodic_tick(&self, cpu: usize, idle: bool, now_ns: u64) -> SchedResult<TickSummary> {
        let mut summary = self.update_class_cputime(cpu, idle, now_ns)?;
        summary.load = self.load_sample(cpu)?;
        summary.pressure = self.load_pressure(cpu)?;
        Ok(summary)
    }

    // PER-CPU HOUSEKEEPING: FOLD UNCOUNTED TIME INTO CLASS STATS, RESAMPLE
    // DEMAND, AND PULL CLASSES THAT FELL BEHIND BACK INTO THE BONUS WINDOW
    pub fn update_class_cputime(&self, cpu: usize, idle: bool, now_ns: u64) -> SchedResult<TickSummary> {
        let t = &self.tunables;
        let list = self.registry.read();
        let mut guard = self.cpu(cpu)?.lock();
        let reference = guard.housekeeping_reference(idle);
        let rq = &mut *guard;

        let mut summary = TickSummary { reference_cvt: reference, ..TickSummary::default() };

        for class in list.iter() {
            let lrq = rq.lrqs.get_mut(&class.id())
                .ok_or(SchedulerInvariantError::UnknownClass(class.id()))?;

            let flushed = lrq.take_uncounted_ns();
            lrq.demand.check_sleep(now_ns);
            {
                let mut stats = class.stats.lock();
                stats.total_ns += flushed;
                stats.set_local_demand(cpu, lrq.demand.cpu_demand());
            }
            summary.flushed_ns += flushed;

            if let InactiveCheck::Advanced { credited, .. } =
                check_inactive_class(&mut rq.classqueue, lrq, reference, t)?
            {
                summary.advanced += 1;
                summary.credited += credited;
            }
        }
        Ok(summary)
    }

    // --- LOAD ---

    pub fn cpu_load(&self, cpu: usize) -> SchedResult<i64> {
        let rq = self.cpu(cpu)?.lock();
        Ok(load::cpu_load(rq.lrqs.values()))
    }

    // RETURNS THE SAMPLED LOAD
    pub fn load_sample(&self, cpu: usize) -> SchedResult<i64> {
        let mut guard = self.cpu(cpu)?.lock();
        let rq = &mut *guard;
        let load = load::cpu_load(rq.lrqs.values());
        rq.load.sample(load);
        Ok(load)
    }

    pub fn load_pressure(&self, cpu: usize) -> SchedResult<i64> {
        let rq = self.cpu(cpu)?.lock();
        Ok(rq.load.pressure(&self.tunables))
    }

    pub fn load_estimator(&self, cpu: usize) -> SchedResult<LoadEstimator> {
        Ok(self.cpu(cpu)?.lock().load)
    }

    // MOST PRESSURED CPU: WHERE A BALANCER WOULD PULL FROM
    pub fn busiest_cpu(&self) -> (usize, i64) {
        self.cpus.iter()
            .enumerate()
            .map(|(cpu, rq)| (cpu, rq.lock().load.pressure(&self.tunables)))
            .fold((0, i64::MIN), |best, cur| if cur.1 > best.1 { cur } else { best })
    }

    // --- OUTBOUND: DECISIONS ---

    // HEAD OF THE CPU'S CLASS QUEUE. BECOMES THE CPU'S CURRENT CLASS.
    pub fn next_class(&self, cpu: usize) -> SchedResult<Option<ClassId>> {
        let mut guard = self.cpu(cpu)?.lock();
        let rq = &mut *guard;
        rq.classqueue.update_base();
        let next = match rq.classqueue.get_head() {
            Some(h) => Some(rq.classqueue.key(h)?),
            None => None,
        };
        rq.current = next;
        Ok(next)
    }

    pub fn current(&self, cpu: usize) -> SchedResult<Option<ClassId>> {
        Ok(self.cpu(cpu)?.lock().current)
    }

    // TRUE IF `a` SHOULD PREEMPT `b` ON `cpu`
    pub fn class_preempts(&self, cpu: usize, a: ClassId, b: ClassId) -> SchedResult<bool> {
        let rq = self.cpu(cpu)?.lock();
        let pa = rq.classqueue.state(rq.lrq(a)?.node())?.priority;
        let pb = rq.classqueue.state(rq.lrq(b)?.node())?.priority;
        Ok(pa < pb)
    }

    pub fn get_max_cvt(&self, cpu: usize) -> SchedResult<u64> {
        Ok(cvt::get_max_cvt(self.cpu(cpu)?.lock().lrqs.values()))
    }

    pub fn get_min_cvt(&self, cpu: usize) -> SchedResult<u64> {
        Ok(cvt::get_min_cvt(self.cpu(cpu)?.lock().lrqs.values()))
    }

    pub fn queued_classes(&self, cpu: usize) -> SchedResult<Vec<ClassId>> {
        let rq = self.cpu(cpu)?.lock();
        rq.classqueue.queued_in_order()
            .into_iter()
            .map(|h| rq.classqueue.key(h))
            .collect()
    }

    // --- OUTBOUND: REPORTING ---

    pub fn local_snapshot(&self, id: ClassId, cpu: usize) -> SchedResult<LocalSnapshot> {
        let rq = self.cpu(cpu)?.lock();
        let lrq = rq.lrq(id)?;
        let node = rq.classqueue.state(lrq.node())?;
        Ok(LocalSnapshot {
            cpu,
            local_cvt: lrq.local_cvt(),
            savings: lrq.savings(),
            uncounted_ns: lrq.uncounted_ns(),
            local_weight: lrq.local_weight(),
            top_priority: lrq.top_priority(),
            priority: node.priority,
            real_priority: node.real_priority,
            index: node.index,
            need_repos: node.need_repos,
            queued: node.queued,
            cpu_demand: lrq.demand.cpu_demand(),
        })
    }

    pub fn class_report(&self, id: ClassId) -> SchedResult<ClassReport> {
        let class = self.registry.get(id).ok_or(SchedulerInvariantError::UnknownClass(id))?;
        let locals = (0..self.cpus.len())
            .map(|cpu| self.local_snapshot(id, cpu))
            .collect::<SchedResult<Vec<_>>>()?;
        let (total_ns, cpu_demand) = {
            let stats = class.stats.lock();
            (stats.total_ns, stats.cpu_demand())
        };
        Ok(ClassReport {
            id,
            name: class.name().to_string(),
            shares: class.shares(),
            total_ns,
            cpu_demand,
            locals,
        })
    }

    pub fn classes(&self) -> Vec<(ClassId, String)> {
        let mut out = Vec::new();
        self.registry.for_each_active(|c| out.push((c.id(), c.name().to_string())));
        out
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("nr_cpus", &self.cpus.len())
            .field("classes", &self.registry.len())
            .finish()
    }
}
