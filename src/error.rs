// CKRM INVARIANT ERRORS
// CALLER CONTRACT VIOLATIONS. THE HOST IS EXPECTED TO STOP THE SUBSYSTEM ON ANY OF THESE.
// BENIGN EDGE CASES (EMPTY QUEUE, ZERO REFERENCE CVT, ZERO RUNTIME) NEVER LAND HERE.

use crate::registry::ClassId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerInvariantError {
    #[error("class queue node is not enqueued")]
    NotEnqueued,

    #[error("class queue node is already enqueued")]
    AlreadyEnqueued,

    #[error("class queue handle refers to a freed slot")]
    StaleHandle,

    #[error("accounting with zero local weight")]
    ZeroWeight,

    #[error("negative lost cvt (min_cvt={min_cvt}, local_cvt={local_cvt})")]
    NegativeLostCvt { min_cvt: u64, local_cvt: u64 },

    #[error("unknown class {0}")]
    UnknownClass(ClassId),

    #[error("cpu {cpu} out of range (nr_cpus={nr_cpus})")]
    InvalidCpu { cpu: usize, nr_cpus: usize },

    #[error("the default class can not be destroyed")]
    DefaultClassPinned,

    #[error("class queue capacity {0} is not a power of two of at least 2")]
    InvalidCapacity(usize),
}

pub type SchedResult<T> = Result<T, SchedulerInvariantError>;
