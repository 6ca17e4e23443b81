// CKRM LOAD ESTIMATOR
// THREE-TERM (PID) LOAD SIGNAL PER CPU FOR CROSS-CPU BALANCING.
//
//   P: LAST SAMPLE
//   I: EXPONENTIAL AVERAGE, 0.9 DECAY
//   D: DELTA SINCE LAST SAMPLE
//
// PRESSURE = (P * KP + I * KI + D * KD) / 100. SIGNED: A DRAINING CPU CAN GO NEGATIVE.

use crate::cvt::LocalRunQueue;
use crate::tuning::{weight_to_share, SchedTunables, LOAD_I_DECAY_DEN, LOAD_I_DECAY_NUM};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoadEstimator {
    pub load_p: i64,
    pub load_i: i64,
    pub load_d: i64,
}

impl LoadEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample(&mut self, load: i64) {
        self.load_d = load - self.load_p;
        self.load_p = load;
        self.load_i = (self.load_i * LOAD_I_DECAY_NUM + load) / LOAD_I_DECAY_DEN;
    }

    pub fn pressure(&self, t: &SchedTunables) -> i64 {
        (self.load_p * t.kp + self.load_i * t.ki + self.load_d * t.kd) / 100
    }
}

// ONE CLASS'S CONTRIBUTION: ITS MEASURED DEMAND, NEVER MORE THAN ITS SHARE
pub fn class_load(lrq: &LocalRunQueue) -> i64 {
    let share = weight_to_share(lrq.local_weight());
    lrq.demand.cpu_demand().min(share) as i64
}

pub fn cpu_load<'a>(lrqs: impl IntoIterator<Item = &'a LocalRunQueue>) -> i64 {
    lrqs.into_iter().map(class_load).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_is_all_derivative() {
        let mut e = LoadEstimator::new();
        e.sample(100);
        assert_eq!(e.load_p, 100);
        assert_eq!(e.load_d, 100);
        assert_eq!(e.load_i, 10);
    }

    #[test]
    fn pressure_uses_gains() {
        let t = SchedTunables::default();
        let e = LoadEstimator { load_p: 100, load_i: 50, load_d: -10 };
        // (2000 + 3000 - 200) / 100
        assert_eq!(e.pressure(&t), 48);
    }

    #[test]
    fn draining_cpu_has_negative_derivative() {
        let mut e = LoadEstimator::new();
        e.sample(128);
        e.sample(0);
        assert_eq!(e.load_d, -128);
        assert_eq!(e.load_p, 0);
    }
}
