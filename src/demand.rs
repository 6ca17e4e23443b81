// CKRM CPU DEMAND ESTIMATOR
// PER (CLASS, CPU). A LOCAL QUEUE IS EITHER RUNNING/WAITING (QUEUED) OR SLEEPING.
//
//   DEMAND(T1,T2) = RUN / (RUN + SLEEP)        IN SHARE UNITS (0..=CKRM_SHARE_MAX)
//
// WINDOWS CLOSE AFTER CPU_DEMAND_CAL_THRESHOLD_NS OF OBSERVED TIME.
// EACH CLOSED WINDOW IS AVERAGED 1:1 WITH THE PREVIOUS ESTIMATE.

use crate::tuning::{CKRM_SHARE_ACCURACY, CKRM_SHARE_MAX, CPU_DEMAND_CAL_THRESHOLD_NS};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DemandEvent {
    Enqueue,          // CLASS BECAME RUNNABLE ON THIS CPU: CREDIT THE SLEEP
    Dequeue,          // CLASS WENT IDLE: START THE SLEEP CLOCK
    Deschedule(u64),  // A TASK OF THIS CLASS RAN FOR N NS
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DemandState {
    Run,
    Sleep,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CpuDemand {
    run:        u64,
    total:      u64,
    last_sleep: Option<u64>,
    cpu_demand: u64,
}

impl CpuDemand {
    // NO SLEEP IS CREDITED UNTIL THE FIRST DEQUEUE
    pub fn new() -> Self {
        Self {
            run: 0,
            total: 0,
            last_sleep: None,
            cpu_demand: 0,
        }
    }

    pub fn cpu_demand(&self) -> u64 {
        self.cpu_demand
    }

    pub fn is_sleeping(&self) -> bool {
        self.last_sleep.is_some()
    }

    pub fn event(&mut self, event: DemandEvent, now_ns: u64) {
        match event {
            DemandEvent::Enqueue => {
                if let Some(since) = self.last_sleep.take() {
                    self.update(DemandState::Sleep, now_ns.saturating_sub(since));
                }
            }
            DemandEvent::Dequeue => {
                self.last_sleep = Some(now_ns);
            }
            DemandEvent::Deschedule(len) => {
                self.update(DemandState::Run, len);
            }
        }
    }

    // HOUSEKEEPING: A CLASS ASLEEP FOR A LONG TIME MUST STILL DECAY
    pub fn check_sleep(&mut self, now_ns: u64) {
        if let Some(since) = self.last_sleep {
            self.last_sleep = Some(now_ns);
            self.update(DemandState::Sleep, now_ns.saturating_sub(since));
        }
    }

    fn update(&mut self, state: DemandState, len: u64) {
        self.total = self.total.saturating_add(len);
        if state == DemandState::Run {
            self.run = self.run.saturating_add(len);
        }

        if self.total >= CPU_DEMAND_CAL_THRESHOLD_NS {
            let total = (self.total >> CKRM_SHARE_ACCURACY).min(0xFFFF_FFFF);
            let window = (self.run / total).min(CKRM_SHARE_MAX);
            self.cpu_demand = (self.cpu_demand + window) >> 1;
            self.total = 0;
            self.run = 0;
        }
    }
}
