// CKRM CLASS REGISTRY
// THE SET OF LIVE CPU CLASSES, IN REGISTRATION ORDER.
//
// READERS (ACCOUNTING, LOAD SAMPLING, REPORTS) VASTLY OUTNUMBER WRITERS
// (CLASS CREATE/DESTROY), SO ONE READER/WRITER LOCK GUARDS THE LIST.
//
// LOCK ORDER: REGISTRY -> CPU RUNQUEUE -> CLASS STATS. NEVER THE REVERSE.

use std::fmt;
use std::sync::Arc;

use log::debug;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{SchedResult, SchedulerInvariantError};
use crate::tuning::{CKRM_MAX_WEIGHT, CKRM_SHARE_MAX};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

// THE ROOT CLASS. ALWAYS REGISTERED, NEVER DESTROYED.
pub const DEFAULT_CLASS: ClassId = ClassId(0);

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// RESOLVED SHARES (CKRM_MAX_WEIGHT SCALE). THE HIERARCHY IS RESOLVED ELSEWHERE.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClassShares {
    pub weight:    u32,
    pub guarantee: u32,
}

impl Default for ClassShares {
    fn default() -> Self {
        Self {
            weight: CKRM_MAX_WEIGHT,
            guarantee: 0,
        }
    }
}

// CUMULATIVE PER-CLASS STATISTICS. UPDATED FROM HOUSEKEEPING UNDER stats.lock()
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassStats {
    pub total_ns: u64,
    local_demand: Vec<u64>,
}

impl ClassStats {
    pub fn new(nr_cpus: usize) -> Self {
        Self {
            total_ns: 0,
            local_demand: vec![0; nr_cpus],
        }
    }

    pub fn set_local_demand(&mut self, cpu: usize, demand: u64) {
        if let Some(d) = self.local_demand.get_mut(cpu) {
            *d = demand;
        }
    }

    pub fn local_demand(&self, cpu: usize) -> u64 {
        self.local_demand.get(cpu).copied().unwrap_or(0)
    }

    // SUM OVER CPUS, CAPPED AT ONE FULL SHARE
    pub fn cpu_demand(&self) -> u64 {
        self.local_demand.iter().sum::<u64>().min(CKRM_SHARE_MAX)
    }
}

pub struct CpuClass {
    id:         ClassId,
    name:       String,
    shares:     Mutex<ClassShares>,
    pub stats:  Mutex<ClassStats>,
}

impl CpuClass {
    pub fn new(id: ClassId, name: &str, shares: ClassShares, nr_cpus: usize) -> Self {
        Self {
            id,
            name: name.to_string(),
            shares: Mutex::new(shares),
            stats: Mutex::new(ClassStats::new(nr_cpus)),
        }
    }

    pub fn id(&self) -> ClassId { self.id }
    pub fn name(&self) -> &str { &self.name }

    pub fn shares(&self) -> ClassShares {
        *self.shares.lock()
    }

    pub fn set_shares(&self, shares: ClassShares) {
        *self.shares.lock() = shares;
    }
}

impl fmt::Debug for CpuClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuClass")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

// THE LIST ITSELF. ONLY REACHABLE THROUGH A REGISTRY GUARD.
#[derive(Default)]
pub struct ClassList {
    classes: Vec<Arc<CpuClass>>,
}

impl ClassList {
    pub fn register(&mut self, class: Arc<CpuClass>) {
        debug!("registry: + class {} ({})", class.id(), class.name());
        self.classes.push(class);
    }

    pub fn unregister(&mut self, id: ClassId) -> SchedResult<Arc<CpuClass>> {
        if id == DEFAULT_CLASS {
            return Err(SchedulerInvariantError::DefaultClassPinned);
        }
        let pos = self.classes.iter()
            .position(|c| c.id() == id)
            .ok_or(SchedulerInvariantError::UnknownClass(id))?;
        let class = self.classes.remove(pos);
        debug!("registry: - class {} ({})", class.id(), class.name());
        Ok(class)
    }

    pub fn get(&self, id: ClassId) -> Option<&Arc<CpuClass>> {
        self.classes.iter().find(|c| c.id() == id)
    }

    pub fn contains(&self, id: ClassId) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<CpuClass>> {
        self.classes.iter()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

#[derive(Default)]
pub struct ClassRegistry {
    list: RwLock<ClassList>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, ClassList> {
        self.list.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, ClassList> {
        self.list.write()
    }

    pub fn register(&self, class: Arc<CpuClass>) {
        self.list.write().register(class);
    }

    pub fn unregister(&self, id: ClassId) -> SchedResult<Arc<CpuClass>> {
        self.list.write().unregister(id)
    }

    pub fn get(&self, id: ClassId) -> Option<Arc<CpuClass>> {
        self.list.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.list.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.read().is_empty()
    }

    // INSERTION ORDER. THE READ LOCK IS HELD FOR THE WHOLE WALK.
    pub fn for_each_active<F: FnMut(&Arc<CpuClass>)>(&self, mut f: F) {
        let list = self.list.read();
        for class in list.iter() {
            f(class);
        }
    }
}
