// CKRM TUNING CONSTANTS
// PURE-RUST MODULE: EVERY KNOB THE CORE READS LIVES HERE
// SHARED BETWEEN THE BINARY (cli/, main.rs) AND THE LIB CRATE (tests)

// WEIGHTS
// FIXED-POINT: CKRM_MAX_WEIGHT IS A FULL CPU. A CLASS WITH HALF THE CPU HAS 512.

pub const WEIGHT_SHIFT: u32      = 10;
pub const CKRM_MAX_WEIGHT: u32   = 1 << WEIGHT_SHIFT;   // 1024

// SHARES
// EXTERNAL SHARE UNIT USED BY THE DEMAND ESTIMATOR AND cpu_load().

pub const CKRM_SHARE_ACCURACY: u32 = 7;
pub const CKRM_SHARE_MAX: u64      = 1 << CKRM_SHARE_ACCURACY;   // 128

// CLASS QUEUE

pub const CLASSQUEUE_SIZE_SHIFT: u32 = 7;
pub const CLASSQUEUE_SIZE: usize     = 1 << CLASSQUEUE_SIZE_SHIFT;   // 128

// EFFECTIVE PRIORITY
// PRIO = (LOCAL_CVT >> CLASS_QUANTIZER) + (TOP_PRIORITY >> PRIORITY_BONUS_RATE)
// ONE STEP = 4096 CVT UNITS = ~4MS OF CPU AT FULL WEIGHT.

pub const CLASS_QUANTIZER: u32     = 12;
pub const PRIORITY_BONUS_RATE: u32 = 0;
pub const MAX_PRIO: u64            = 140;

// CVT ACCOUNTING

pub const NSEC_PER_MS: u64  = 1_000_000;
pub const NSEC_PER_SEC: u64 = 1_000_000_000;

pub const INTERACTIVE_BONUS_NS: u64    = 200 * NSEC_PER_MS;   // 200MS REACTIVATION HEADROOM
pub const MAX_SAVINGS: u64             = 4 * NSEC_PER_SEC;    // 4S OF BANKED CPU TIME
pub const CVT_STARVATION_INC_LIMIT: u64 = 100_000;            // PER UNIT OF LOCAL WEIGHT
pub const SKEW_FLOOR_WEIGHT: u32       = CKRM_MAX_WEIGHT / 32; // 32: BELOW THIS A WEIGHT IS SKEWED

// CPU DEMAND
// WINDOW CLOSES AFTER 1S OF OBSERVED RUN+SLEEP TIME

pub const CPU_DEMAND_CAL_THRESHOLD_NS: u64 = NSEC_PER_SEC;

// LOAD ESTIMATOR (PID)

pub const PID_KP: i64 = 20;
pub const PID_KI: i64 = 60;
pub const PID_KD: i64 = 20;
pub const LOAD_I_DECAY_NUM: i64 = 9;    // LOAD_I = (LOAD_I * 9 + LOAD) / 10
pub const LOAD_I_DECAY_DEN: i64 = 10;

// HOUSEKEEPING CADENCE (HOST SIDE). LOAD IS SAMPLED ON EVERY TICK.

pub const CVT_UPDATE_TICK_NS: u64 = 100 * NSEC_PER_MS;

// INTERACTIVE BONUS IN VIRTUAL TIME FOR A GIVEN WEIGHT.
// ROUNDED UP SO A FULL-WEIGHT CLASS GETS 195313 UNITS, NOT 195312.
pub fn interactive_bonus(bonus_ns: u64, local_weight: u32) -> u64 {
    if local_weight == 0 {
        return 0;
    }
    bonus_ns.div_ceil(local_weight as u64)
}

// WEIGHT (0..=CKRM_MAX_WEIGHT) -> SHARE UNITS (0..=CKRM_SHARE_MAX)
pub fn weight_to_share(weight: u32) -> u64 {
    (weight as u64 * CKRM_SHARE_MAX) >> WEIGHT_SHIFT
}

// CONSTRUCTION-TIME KNOBS
// ONE INSTANCE PER SCHEDULER. DEFAULT == THE CONSTANTS ABOVE.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SchedTunables {
    pub classqueue_size: usize,
    pub class_quantizer: u32,
    pub max_savings: u64,
    pub interactive_bonus_ns: u64,
    pub starvation_inc_limit: u64,
    pub skew_floor_weight: u32,
    pub kp: i64,
    pub ki: i64,
    pub kd: i64,
}

impl Default for SchedTunables {
    fn default() -> Self {
        Self {
            classqueue_size: CLASSQUEUE_SIZE,
            class_quantizer: CLASS_QUANTIZER,
            max_savings: MAX_SAVINGS,
            interactive_bonus_ns: INTERACTIVE_BONUS_NS,
            starvation_inc_limit: CVT_STARVATION_INC_LIMIT,
            skew_floor_weight: SKEW_FLOOR_WEIGHT,
            kp: PID_KP,
            ki: PID_KI,
            kd: PID_KD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bonus_at_full_weight() {
        assert_eq!(interactive_bonus(INTERACTIVE_BONUS_NS, CKRM_MAX_WEIGHT), 195_313);
    }

    #[test]
    fn bonus_zero_weight_is_zero() {
        assert_eq!(interactive_bonus(INTERACTIVE_BONUS_NS, 0), 0);
    }

    #[test]
    fn share_conversion_bounds() {
        assert_eq!(weight_to_share(CKRM_MAX_WEIGHT), CKRM_SHARE_MAX);
        assert_eq!(weight_to_share(CKRM_MAX_WEIGHT / 2), CKRM_SHARE_MAX / 2);
        assert_eq!(weight_to_share(0), 0);
    }

    #[test]
    fn default_tunables_match_constants() {
        let t = SchedTunables::default();
        assert_eq!(t.classqueue_size, 128);
        assert!(t.classqueue_size.is_power_of_two());
        assert_eq!((t.kp, t.ki, t.kd), (20, 60, 20));
    }
}
