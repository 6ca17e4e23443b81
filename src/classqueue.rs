// CKRM CLASS QUEUE
// PER-CPU RUNQUEUE OF CLASSES (NOT TASKS), ORDERED BY CVT-DERIVED PRIORITY.
//
// A SLIDING WINDOW OF `capacity` PRIORITIES [base, base + capacity - 1] IS
// MAPPED ONTO A CIRCULAR ARRAY OF FIFO BUCKETS. base_offset IS THE PHYSICAL
// BUCKET HOLDING `base`. A BITMAP OF NON-EMPTY BUCKETS GIVES O(WORDS) HEAD LOOKUP.
//
// PRIORITIES ABOVE THE WINDOW ARE CLAMPED TO THE TOP AND FLAGGED need_repos.
// THEY ARE RE-HOMED LAZILY WHEN THEY REACH THE HEAD (THE WINDOW HAS MOVED BY THEN).
// PRIORITIES BELOW THE WINDOW ARE PAST DUE: THEY RUN AT THE FLOOR, AHEAD OF
// ON-TIME ENTRIES, ORDERED AMONG THEMSELVES BY THEIR REAL PRIORITY.
//
// NODES LIVE IN AN ARENA OWNED BY THE QUEUE. CALLERS HOLD A NodeHandle.
// ARENA SLOTS ARE ALLOCATED AT CLASS REGISTRATION, NEVER ON ENQUEUE/DEQUEUE.

use log::{error, trace};

use crate::bitmap::PrioBitmap;
use crate::error::{SchedResult, SchedulerInvariantError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeHandle {
    slot: u32,
    gen:  u32,
}

// READ-ONLY VIEW OF A NODE'S QUEUE STATE
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeState {
    pub priority:      u64,
    pub real_priority: u64,
    pub index:         usize,
    pub need_repos:    bool,
    pub queued:        bool,
}

#[derive(Clone, Debug)]
struct Node<K> {
    key:        K,
    prio:       u64,
    real_prio:  u64,
    index:      usize,
    need_repos: bool,
    queued:     bool,
    prev:       Option<u32>,
    next:       Option<u32>,
}

impl<K> Node<K> {
    fn past_due(&self) -> bool {
        self.real_prio < self.prio
    }
}

#[derive(Clone, Debug)]
struct Slot<K> {
    gen:  u32,
    node: Option<Node<K>>,
}

// RESULT OF CLAMP-AND-MAP
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Placement {
    prio:       u64,
    index:      usize,
    need_repos: bool,
}

#[derive(Clone, Debug)]
struct Bucket {
    head: Option<u32>,
    tail: Option<u32>,
}

const EMPTY_BUCKET: Bucket = Bucket { head: None, tail: None };

pub struct ClassQueue<K> {
    enabled:     bool,
    capacity:    usize,
    base:        u64,
    base_offset: usize,
    nr_active:   usize,
    bitmap:      PrioBitmap,
    buckets:     Box<[Bucket]>,
    slots:       Vec<Slot<K>>,
    free:        Vec<u32>,
}

impl<K: Copy> ClassQueue<K> {
    pub fn new(capacity: usize) -> SchedResult<Self> {
        // ONE SLOT LEAVES NO ROOM ABOVE BASE TO RE-HOME A PARKED NODE
        if capacity < 2 || !capacity.is_power_of_two() {
            return Err(SchedulerInvariantError::InvalidCapacity(capacity));
        }
        Ok(Self {
            enabled: true,
            capacity,
            base: 0,
            base_offset: 0,
            nr_active: 0,
            bitmap: PrioBitmap::new(capacity),
            buckets: vec![EMPTY_BUCKET; capacity].into_boxed_slice(),
            slots: Vec::new(),
            free: Vec::new(),
        })
    }

    // RESET TO EMPTY. REGISTERED NODES SURVIVE BUT ARE NO LONGER QUEUED.
    pub fn init(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.base = 0;
        self.base_offset = 0;
        self.nr_active = 0;
        self.bitmap.clear_all();
        self.buckets.iter_mut().for_each(|b| *b = EMPTY_BUCKET);
        for node in self.slots.iter_mut().filter_map(|s| s.node.as_mut()) {
            node.queued = false;
            node.need_repos = false;
            node.prev = None;
            node.next = None;
        }
    }

    pub fn is_enabled(&self) -> bool { self.enabled }
    pub fn capacity(&self) -> usize { self.capacity }
    pub fn base(&self) -> u64 { self.base }
    pub fn base_offset(&self) -> usize { self.base_offset }
    pub fn len(&self) -> usize { self.nr_active }
    pub fn is_empty(&self) -> bool { self.nr_active == 0 }

    // --- ARENA ---

    pub fn insert_node(&mut self, key: K) -> NodeHandle {
        let node = Node {
            key,
            prio: 0,
            real_prio: 0,
            index: 0,
            need_repos: false,
            queued: false,
            prev: None,
            next: None,
        };
        match self.free.pop() {
            Some(slot) => {
                let s = &mut self.slots[slot as usize];
                s.node = Some(node);
                NodeHandle { slot, gen: s.gen }
            }
            None => {
                let slot = self.slots.len() as u32;
                self.slots.push(Slot { gen: 0, node: Some(node) });
                NodeHandle { slot, gen: 0 }
            }
        }
    }

    // RELEASE A SLOT. DEQUEUES FIRST IF NEEDED. OLD HANDLES GO STALE.
    pub fn remove_node(&mut self, h: NodeHandle) -> SchedResult<K> {
        if self.node(h)?.queued {
            self.dequeue(h)?;
        }
        let s = &mut self.slots[h.slot as usize];
        let node = s.node.take().ok_or(SchedulerInvariantError::StaleHandle)?;
        s.gen = s.gen.wrapping_add(1);
        self.free.push(h.slot);
        Ok(node.key)
    }

    pub fn key(&self, h: NodeHandle) -> SchedResult<K> {
        Ok(self.node(h)?.key)
    }

    pub fn state(&self, h: NodeHandle) -> SchedResult<NodeState> {
        let n = self.node(h)?;
        Ok(NodeState {
            priority: n.prio,
            real_priority: n.real_prio,
            index: n.index,
            need_repos: n.need_repos,
            queued: n.queued,
        })
    }

    pub fn is_queued(&self, h: NodeHandle) -> bool {
        self.node(h).map(|n| n.queued).unwrap_or(false)
    }

    fn node(&self, h: NodeHandle) -> SchedResult<&Node<K>> {
        match self.slots.get(h.slot as usize) {
            Some(Slot { gen, node: Some(n) }) if *gen == h.gen => Ok(n),
            _ => Err(SchedulerInvariantError::StaleHandle),
        }
    }

    fn node_mut(&mut self, h: NodeHandle) -> SchedResult<&mut Node<K>> {
        match self.slots.get_mut(h.slot as usize) {
            Some(Slot { gen, node: Some(n) }) if *gen == h.gen => Ok(n),
            _ => Err(SchedulerInvariantError::StaleHandle),
        }
    }

    // SLOT ACCESS FOR LIST SURGERY. ONLY CALLED ON SLOTS KNOWN TO BE LINKED.
    fn at(&self, slot: u32) -> &Node<K> {
        self.slots[slot as usize].node.as_ref().expect("linked slot is live")
    }

    fn at_mut(&mut self, slot: u32) -> &mut Node<K> {
        self.slots[slot as usize].node.as_mut().expect("linked slot is live")
    }

    fn handle_of(&self, slot: u32) -> NodeHandle {
        NodeHandle { slot, gen: self.slots[slot as usize].gen }
    }

    // --- CLAMP AND MAP ---

    // VALID WINDOW IS [base, base + capacity - 1]
    fn place(&self, requested: u64) -> Placement {
        let max_prio = self.base.saturating_add(self.capacity as u64 - 1);
        let (prio, need_repos) = if requested > max_prio {
            (max_prio, true)
        } else if requested < self.base {
            (self.base, false)
        } else {
            (requested, false)
        };
        let index = (self.base_offset + (prio - self.base) as usize) & (self.capacity - 1);
        Placement { prio, index, need_repos }
    }

    // --- BUCKET LISTS ---

    fn link_tail(&mut self, index: usize, slot: u32) {
        let old_tail = self.buckets[index].tail;
        {
            let n = self.at_mut(slot);
            n.prev = old_tail;
            n.next = None;
        }
        match old_tail {
            Some(t) => self.at_mut(t).next = Some(slot),
            None => self.buckets[index].head = Some(slot),
        }
        self.buckets[index].tail = Some(slot);
        self.bitmap.set(index);
    }

    // PAST-DUE ENTRIES GO AHEAD OF ON-TIME ONES, SORTED BY REAL PRIORITY, FIFO ON TIES
    fn link_past_due(&mut self, index: usize, slot: u32) {
        let real = self.at(slot).real_prio;
        let mut cursor = self.buckets[index].head;
        while let Some(c) = cursor {
            let n = self.at(c);
            if !n.past_due() || n.real_prio > real {
                break;
            }
            cursor = n.next;
        }
        let Some(before) = cursor else {
            self.link_tail(index, slot);
            return;
        };
        let prev = self.at(before).prev;
        {
            let n = self.at_mut(slot);
            n.prev = prev;
            n.next = Some(before);
        }
        self.at_mut(before).prev = Some(slot);
        match prev {
            Some(p) => self.at_mut(p).next = Some(slot),
            None => self.buckets[index].head = Some(slot),
        }
        self.bitmap.set(index);
    }

    fn link(&mut self, index: usize, slot: u32) {
        if self.at(slot).past_due() {
            self.link_past_due(index, slot);
        } else {
            self.link_tail(index, slot);
        }
    }

    fn unlink(&mut self, slot: u32) {
        let (index, prev, next) = {
            let n = self.at(slot);
            (n.index, n.prev, n.next)
        };
        match prev {
            Some(p) => self.at_mut(p).next = next,
            None => self.buckets[index].head = next,
        }
        match next {
            Some(nx) => self.at_mut(nx).prev = prev,
            None => self.buckets[index].tail = prev,
        }
        let n = self.at_mut(slot);
        n.prev = None;
        n.next = None;
        if self.buckets[index].head.is_none() {
            self.bitmap.clear(index);
        }
    }

    fn apply(&mut self, slot: u32, requested: u64, p: Placement) {
        let n = self.at_mut(slot);
        n.prio = p.prio;
        n.real_prio = requested;
        n.index = p.index;
        n.need_repos = p.need_repos;
    }

    // --- OPERATIONS ---

    pub fn enqueue(&mut self, h: NodeHandle, prio: u64) -> SchedResult<()> {
        if self.node(h)?.queued {
            error!("classqueue: enqueue of queued node {:?}", h);
            return Err(SchedulerInvariantError::AlreadyEnqueued);
        }

        let placement = if self.nr_active == 0 {
            // FIRST MEMBER ANCHORS THE WINDOW
            self.base = prio;
            self.base_offset = 0;
            Placement { prio, index: 0, need_repos: false }
        } else {
            self.place(prio)
        };

        self.apply(h.slot, prio, placement);
        self.link(placement.index, h.slot);
        self.at_mut(h.slot).queued = true;
        self.nr_active += 1;

        if placement.need_repos {
            trace!("classqueue: prio {} beyond window, parked at {}", prio, placement.prio);
        }
        Ok(())
    }

    pub fn dequeue(&mut self, h: NodeHandle) -> SchedResult<()> {
        if !self.node(h)?.queued {
            error!("classqueue: dequeue of idle node {:?}", h);
            return Err(SchedulerInvariantError::NotEnqueued);
        }
        self.unlink(h.slot);
        let n = self.at_mut(h.slot);
        n.queued = false;
        n.need_repos = false;
        self.nr_active -= 1;
        Ok(())
    }

    // MOVE A QUEUED NODE TO THE TAIL OF ITS NEW BUCKET (ROUND ROBIN ON TIES).
    // NO-OP FOR NODES NOT IN THE QUEUE.
    pub fn update_priority(&mut self, h: NodeHandle, new_prio: u64) -> SchedResult<()> {
        if !self.node(h)?.queued {
            return Ok(());
        }
        self.unlink(h.slot);
        let placement = self.place(new_prio);
        self.apply(h.slot, new_prio, placement);
        self.link(placement.index, h.slot);
        Ok(())
    }

    fn head_slot(&self) -> Option<u32> {
        let pos = self.bitmap.find_next_set_circular(self.base_offset)?;
        let slot = self.buckets[pos].head;
        debug_assert!(slot.is_some(), "bitmap bit {} set on empty bucket", pos);
        slot
    }

    // HIGHEST-PRIORITY CLASS. RE-HOMES need_repos ENTRIES FOUND AT THE HEAD.
    // MUTATES THE QUEUE: CALLER HOLDS THE CPU LOCK.
    pub fn get_head(&mut self) -> Option<NodeHandle> {
        loop {
            let slot = self.head_slot()?;
            if !self.at(slot).need_repos {
                return Some(self.handle_of(slot));
            }

            let real = self.at(slot).real_prio;
            self.unlink(slot);
            self.nr_active -= 1;

            if self.nr_active == 0 {
                self.base = real;
                self.base_offset = 0;
            } else {
                self.update_base();
            }

            let placement = if self.nr_active == 0 {
                Placement { prio: real, index: 0, need_repos: false }
            } else {
                self.place(real)
            };
            trace!("classqueue: repositioning to prio {} (base {})", placement.prio, self.base);
            self.apply(slot, real, placement);
            self.link(placement.index, slot);
            self.nr_active += 1;
        }
    }

    // PRIORITY OF THE CURRENT HEAD WITHOUT REPOSITIONING SIDE EFFECTS
    pub fn get_min_priority(&self) -> Option<u64> {
        self.head_slot().map(|s| self.at(s).prio)
    }

    // SLIDE THE WINDOW FLOOR UP TO THE LOWEST PRIORITY PRESENT. NEVER MOVES DOWN.
    pub fn update_base(&mut self) {
        if self.nr_active == 0 {
            self.base = 0;
            self.base_offset = 0;
            return;
        }
        let Some(slot) = self.head_slot() else {
            return;
        };
        let new_base = self.at(slot).prio;
        if new_base > self.base {
            self.base_offset = self.at(slot).index;
            self.base = new_base;
        }
    }

    // QUEUED HANDLES IN SCHEDULING ORDER (DIAGNOSTICS ONLY: ALLOCATES)
    pub fn queued_in_order(&self) -> Vec<NodeHandle> {
        let mut out = Vec::with_capacity(self.nr_active);
        for i in 0..self.capacity {
            let pos = (self.base_offset + i) & (self.capacity - 1);
            let mut cursor = self.buckets[pos].head;
            while let Some(c) = cursor {
                out.push(self.handle_of(c));
                cursor = self.at(c).next;
            }
        }
        out
    }
}
