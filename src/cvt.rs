// CKRM CUMULATIVE VIRTUAL TIME (CVT) ACCOUNTING
//
// EVERY (CLASS, CPU) PAIR OWNS A LocalRunQueue. CONSUMED CPU TIME IS CHARGED
// AS consumed_ns / local_weight, SO HEAVIER CLASSES ACCRUE CVT MORE SLOWLY AND
// COME BACK TO THE HEAD OF THE CLASS QUEUE SOONER.
//
// A CLASS THAT SLEEPS FALLS BEHIND. HOUSEKEEPING PULLS IT FORWARD TO WITHIN
// ONE INTERACTIVE BONUS OF THE REFERENCE CVT AND BANKS THE DIFFERENCE AS
// SAVINGS (BOUNDED BY max_savings).
//
// ALL MUTATION HAPPENS UNDER THE OWNING CPU'S LOCK (see scheduler.rs), WHICH
// ORDERS update_local_cvt AGAINST check_inactive_class FOR THE SAME CLASS.

use log::{debug, error, trace, warn};

use crate::classqueue::{ClassQueue, NodeHandle};
use crate::demand::CpuDemand;
use crate::error::{SchedResult, SchedulerInvariantError};
use crate::registry::ClassId;
use crate::tuning::{
    interactive_bonus, SchedTunables, CKRM_MAX_WEIGHT, MAX_PRIO, PRIORITY_BONUS_RATE, WEIGHT_SHIFT,
};

#[derive(Clone, Debug)]
pub struct LocalRunQueue {
    class:         ClassId,
    node:          NodeHandle,
    local_cvt:     u64,
    savings:       u64,
    uncounted_ns:  u64,
    local_weight:  u32,
    guarantee:     u32,
    over_weight:   u32,
    skewed_weight: u32,   // 0 == NOT SKEWED
    top_priority:  u64,
    pub demand:    CpuDemand,
}

// WHAT ONE update_local_cvt CALL DID
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CvtCharge {
    pub cvt_increment: u64,
    pub savings_used:  u64,
    pub skewed:        bool,
}

// WHAT ONE check_inactive_class CALL DID
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InactiveCheck {
    NoReference,
    InWindow,
    Bootstrapped { local_cvt: u64 },
    Advanced { min_cvt: u64, lost_cvt: u64, credited: u64 },
}

impl InactiveCheck {
    pub fn moved_cvt(&self) -> bool {
        matches!(self, Self::Bootstrapped { .. } | Self::Advanced { .. })
    }
}

impl LocalRunQueue {
    pub fn new(
        class: ClassId,
        node: NodeHandle,
        weight: u32,
        guarantee: u32,
        t: &SchedTunables,
    ) -> SchedResult<Self> {
        let mut lrq = Self {
            class,
            node,
            local_cvt: 0,
            savings: 0,
            uncounted_ns: 0,
            local_weight: 1,
            guarantee: 0,
            over_weight: 0,
            skewed_weight: 0,
            top_priority: 0,
            demand: CpuDemand::new(),
        };
        lrq.set_weight(weight, guarantee, t)?;
        Ok(lrq)
    }

    pub fn class(&self) -> ClassId { self.class }
    pub fn node(&self) -> NodeHandle { self.node }
    pub fn local_cvt(&self) -> u64 { self.local_cvt }
    pub fn savings(&self) -> u64 { self.savings }
    pub fn uncounted_ns(&self) -> u64 { self.uncounted_ns }
    pub fn local_weight(&self) -> u32 { self.local_weight }
    pub fn guarantee(&self) -> u32 { self.guarantee }
    pub fn over_weight(&self) -> u32 { self.over_weight }
    pub fn skewed_weight(&self) -> u32 { self.skewed_weight }
    pub fn top_priority(&self) -> u64 { self.top_priority }

    pub fn is_skewed(&self) -> bool {
        self.skewed_weight != 0
    }

    // RESOLVED WEIGHT FROM THE SHARE HIERARCHY. ZERO IS A CALLER BUG.
    pub fn set_weight(&mut self, weight: u32, guarantee: u32, t: &SchedTunables) -> SchedResult<()> {
        if weight == 0 {
            error!("class {}: zero weight", self.class);
            return Err(SchedulerInvariantError::ZeroWeight);
        }
        let weight = weight.min(CKRM_MAX_WEIGHT);
        self.local_weight = weight;
        self.guarantee = guarantee.min(CKRM_MAX_WEIGHT);
        self.over_weight = weight.saturating_sub(self.guarantee);
        self.skewed_weight = if weight < t.skew_floor_weight {
            t.skew_floor_weight
        } else {
            0
        };
        Ok(())
    }

    pub fn set_top_priority(&mut self, prio: u64) {
        self.top_priority = prio.min(MAX_PRIO);
    }

    // DRAIN NANOSECONDS NOT YET FOLDED INTO CLASS STATISTICS
    pub fn take_uncounted_ns(&mut self) -> u64 {
        std::mem::take(&mut self.uncounted_ns)
    }

    // PRIO = PROGRESS + URGENCY
    pub fn effective_priority(&self, t: &SchedTunables) -> u64 {
        self.local_cvt.checked_shr(t.class_quantizer).unwrap_or(0)
            .saturating_add(self.top_priority >> PRIORITY_BONUS_RATE)
    }

    // STEPS 1-4 OF update_local_cvt. PRIORITY IS THE CALLER'S (NEEDS THE QUEUE).
    pub fn charge(&mut self, consumed_ns: u64, t: &SchedTunables) -> SchedResult<CvtCharge> {
        if consumed_ns == 0 {
            return Ok(CvtCharge::default());
        }
        if self.local_weight == 0 {
            error!("class {}: charge with zero weight", self.class);
            return Err(SchedulerInvariantError::ZeroWeight);
        }

        // OVER-WEIGHT CLASSES BURN SAVINGS FIRST
        let mut savings_used = 0;
        if self.savings > 0 && self.over_weight > 0 {
            savings_used = self.savings
                .min((consumed_ns >> WEIGHT_SHIFT).saturating_mul(self.over_weight as u64));
            self.savings -= savings_used;
        }

        let mut cvt_increment = consumed_ns / self.local_weight as u64;

        // STARVATION GUARD: A NEAR-ZERO WEIGHT MUST NOT JUMP OUT OF REACH
        let mut skewed = false;
        let ceiling = t.starvation_inc_limit.saturating_mul(self.local_weight as u64);
        if self.is_skewed() && cvt_increment > ceiling {
            cvt_increment = consumed_ns / self.skewed_weight as u64;
            skewed = true;
            warn!("class {}: skewed weight {} (local {}), cvt increment capped to {}",
                  self.class, self.skewed_weight, self.local_weight, cvt_increment);
        }

        // ANY RUNTIME ADVANCES CVT
        let cvt_increment = cvt_increment.max(1);

        self.local_cvt = self.local_cvt.saturating_add(cvt_increment);
        self.uncounted_ns = self.uncounted_ns.saturating_add(consumed_ns);

        trace!("class {}: ran {}ns, cvt +{} -> {}, savings -{}",
               self.class, consumed_ns, cvt_increment, self.local_cvt, savings_used);

        Ok(CvtCharge { cvt_increment, savings_used, skewed })
    }

    // CLAMP A CLASS THAT FELL TOO FAR BEHIND THE REFERENCE. IDEMPOTENT FOR A FIXED REFERENCE.
    pub fn check_inactive(&mut self, current_global_cvt: u64, t: &SchedTunables) -> SchedResult<InactiveCheck> {
        if current_global_cvt == 0 {
            return Ok(InactiveCheck::NoReference);
        }

        let bonus = interactive_bonus(t.interactive_bonus_ns, self.local_weight);
        let min_cvt = current_global_cvt.saturating_sub(bonus);

        if self.local_cvt >= min_cvt {
            return Ok(InactiveCheck::InWindow);
        }

        // NEVER RAN: START AT THE REFERENCE, NOTHING TO COMPENSATE
        if self.local_cvt == 0 {
            self.local_cvt = current_global_cvt;
            return Ok(InactiveCheck::Bootstrapped { local_cvt: current_global_cvt });
        }

        let behind = min_cvt.checked_sub(self.local_cvt).ok_or_else(|| {
            error!("class {}: lost cvt underflow ({} < {})", self.class, min_cvt, self.local_cvt);
            SchedulerInvariantError::NegativeLostCvt { min_cvt, local_cvt: self.local_cvt }
        })?;
        let lost_cvt = behind.saturating_mul(self.local_weight as u64);

        let before = self.savings;
        self.savings = self.savings.saturating_add(lost_cvt).min(t.max_savings);
        self.local_cvt = min_cvt;

        if before.saturating_add(lost_cvt) > t.max_savings {
            debug!("class {}: savings capped at {}", self.class, t.max_savings);
        }

        Ok(InactiveCheck::Advanced {
            min_cvt,
            lost_cvt,
            credited: self.savings - before,
        })
    }
}

// RE-POSITION THE CLASS IN ITS CPU'S QUEUE AFTER CVT OR URGENCY CHANGED
pub fn update_class_priority(
    cq: &mut ClassQueue<ClassId>,
    lrq: &LocalRunQueue,
    t: &SchedTunables,
) -> SchedResult<()> {
    cq.update_priority(lrq.node, lrq.effective_priority(t))
}

// CALLED AFTER A TASK OF THIS CLASS IS SWITCHED OUT
pub fn update_local_cvt(
    cq: &mut ClassQueue<ClassId>,
    lrq: &mut LocalRunQueue,
    consumed_ns: u64,
    t: &SchedTunables,
) -> SchedResult<CvtCharge> {
    let charge = lrq.charge(consumed_ns, t)?;
    if consumed_ns > 0 {
        update_class_priority(cq, lrq, t)?;
    }
    Ok(charge)
}

pub fn check_inactive_class(
    cq: &mut ClassQueue<ClassId>,
    lrq: &mut LocalRunQueue,
    current_global_cvt: u64,
    t: &SchedTunables,
) -> SchedResult<InactiveCheck> {
    let result = lrq.check_inactive(current_global_cvt, t)?;
    if result.moved_cvt() {
        update_class_priority(cq, lrq, t)?;
    }
    Ok(result)
}

// LARGEST CVT ON A CPU: REFERENCE WHEN THE CPU IS IDLE
pub fn get_max_cvt<'a>(lrqs: impl IntoIterator<Item = &'a LocalRunQueue>) -> u64 {
    lrqs.into_iter().map(|l| l.local_cvt).max().unwrap_or(0)
}

pub fn get_min_cvt<'a>(lrqs: impl IntoIterator<Item = &'a LocalRunQueue>) -> u64 {
    lrqs.into_iter().map(|l| l.local_cvt).min().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lrq(weight: u32, guarantee: u32) -> (ClassQueue<ClassId>, LocalRunQueue) {
        let t = SchedTunables::default();
        let mut cq = ClassQueue::new(t.classqueue_size).unwrap();
        let node = cq.insert_node(ClassId(7));
        let l = LocalRunQueue::new(ClassId(7), node, weight, guarantee, &t).unwrap();
        (cq, l)
    }

    #[test]
    fn derived_weights() {
        let t = SchedTunables::default();
        let (_, mut l) = lrq(600, 256);
        assert_eq!(l.over_weight(), 344);
        assert!(!l.is_skewed());
        l.set_weight(8, 0, &t).unwrap();
        assert_eq!(l.skewed_weight(), t.skew_floor_weight);
        assert_eq!(l.set_weight(0, 0, &t), Err(SchedulerInvariantError::ZeroWeight));
    }

    #[test]
    fn over_weight_class_spends_savings() {
        let t = SchedTunables::default();
        let (_, mut l) = lrq(1024, 512);
        l.savings = 1_000_000;
        let c = l.charge(10_240, &t).unwrap();
        // (10240 >> 10) * 512
        assert_eq!(c.savings_used, 5_120);
        assert_eq!(l.savings(), 1_000_000 - 5_120);
    }

    #[test]
    fn under_guarantee_class_keeps_savings() {
        let t = SchedTunables::default();
        let (_, mut l) = lrq(512, 512);
        l.savings = 1_000;
        l.charge(1_000_000, &t).unwrap();
        assert_eq!(l.savings(), 1_000);
    }

    #[test]
    fn priority_tracks_cvt_and_urgency() {
        let t = SchedTunables::default();
        let (_, mut l) = lrq(1024, 0);
        l.local_cvt = 3 << t.class_quantizer;
        l.set_top_priority(5);
        assert_eq!(l.effective_priority(&t), 8);
        l.set_top_priority(10_000);
        assert_eq!(l.top_priority(), MAX_PRIO);
    }

    #[test]
    fn take_uncounted_resets() {
        let t = SchedTunables::default();
        let (_, mut l) = lrq(1024, 0);
        l.charge(5_000, &t).unwrap();
        assert_eq!(l.take_uncounted_ns(), 5_000);
        assert_eq!(l.uncounted_ns(), 0);
    }
}
