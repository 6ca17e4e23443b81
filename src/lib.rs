// CKRM CLASS-BASED CPU SCHEDULER CORE
// PROPORTIONAL-SHARE SCHEDULING OF TASK CLASSES ON TOP OF A HOST SCHEDULER.
//
// PER CPU: A ClassQueue ORDERS CLASSES BY CVT-DERIVED PRIORITY, EACH CLASS
// OWNS A LocalRunQueue (CVT, SAVINGS, DEMAND), A PID LoadEstimator TRACKS
// PRESSURE. A ClassRegistry HOLDS THE LIVE CLASSES. Scheduler WIRES IT ALL
// BEHIND THE INBOUND/OUTBOUND CALLS THE HOST MAKES.

pub mod bitmap;
pub mod classqueue;
pub mod cvt;
pub mod demand;
pub mod error;
pub mod event;
pub mod load;
pub mod registry;
pub mod scheduler;
pub mod sim;
pub mod tuning;
pub mod workload;

pub use error::{SchedResult, SchedulerInvariantError};
pub use registry::{ClassId, ClassShares, DEFAULT_CLASS};
pub use scheduler::Scheduler;
