// CKRM CLASS QUEUE TESTS
// CLAMP-AND-MAP ORDERING, WINDOW ESCAPE, BASE MAINTENANCE, CONTRACT ERRORS
//
// ALL TESTS USE PURE-RUST TYPES FROM ckrm_sched::classqueue. RUN OFFLINE.

use ckrm_sched::classqueue::{ClassQueue, NodeHandle};
use ckrm_sched::tuning::CLASSQUEUE_SIZE;
use ckrm_sched::SchedulerInvariantError;

// XORSHIFT64: DETERMINISTIC SEQUENCES WITHOUT A RNG DEPENDENCY
struct Rng(u64);

impl Rng {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }
}

// === SCENARIOS ===

#[test]
fn past_due_class_runs_first_then_fifo() {
    let mut cq = ClassQueue::new(CLASSQUEUE_SIZE).unwrap();
    let a = cq.insert_node('A');
    let b = cq.insert_node('B');
    let c = cq.insert_node('C');

    cq.enqueue(a, 10).unwrap();
    cq.enqueue(b, 10).unwrap();
    cq.enqueue(c, 5).unwrap();

    assert_eq!(cq.get_head(), Some(c));
    assert_eq!(cq.key(c).unwrap(), 'C');
    assert_eq!(cq.state(c).unwrap().real_priority, 5);

    cq.dequeue(c).unwrap();
    assert_eq!(cq.get_head(), Some(a));
    assert_eq!(cq.state(a).unwrap().priority, 10);
}

#[test]
fn empty_queue_has_no_head() {
    let mut cq: ClassQueue<u32> = ClassQueue::new(CLASSQUEUE_SIZE).unwrap();
    assert_eq!(cq.get_head(), None);
    assert_eq!(cq.get_min_priority(), None);
    cq.update_base();
    assert_eq!((cq.base(), cq.base_offset()), (0, 0));
}

#[test]
fn capacity_must_be_power_of_two() {
    assert_eq!(ClassQueue::<u32>::new(100).err(), Some(SchedulerInvariantError::InvalidCapacity(100)));
    assert_eq!(ClassQueue::<u32>::new(0).err(), Some(SchedulerInvariantError::InvalidCapacity(0)));
    assert!(ClassQueue::<u32>::new(64).is_ok());
}

#[test]
fn single_slot_queue_rejected() {
    // 1 IS A POWER OF TWO BUT LEAVES NO BUCKET ABOVE BASE
    assert_eq!(ClassQueue::<u32>::new(1).err(), Some(SchedulerInvariantError::InvalidCapacity(1)));

    let mut cq = ClassQueue::new(2).unwrap();
    let a = cq.insert_node(1u32);
    let b = cq.insert_node(2u32);
    cq.enqueue(a, 0).unwrap();
    cq.enqueue(b, 5).unwrap();
    cq.update_priority(a, 10).unwrap();
    assert!(cq.state(a).unwrap().need_repos);
    assert!(cq.state(b).unwrap().need_repos);

    // BOTH PARKED IN THE TOP BUCKET: THE HEAD SCAN STILL TERMINATES
    assert_eq!(cq.get_head(), Some(b));
    assert_eq!(cq.state(b).unwrap().priority, 5);
    cq.dequeue(b).unwrap();
    assert_eq!(cq.get_head(), Some(a));
    assert_eq!(cq.state(a).unwrap().priority, 10);
}

// === WINDOW ESCAPE ===

#[test]
fn beyond_window_is_parked_then_restored_alone() {
    let mut cq = ClassQueue::new(8).unwrap();
    let a = cq.insert_node(1u32);
    let b = cq.insert_node(2u32);
    cq.enqueue(a, 0).unwrap();
    cq.enqueue(b, 20).unwrap();

    let parked = cq.state(b).unwrap();
    assert!(parked.need_repos);
    assert_eq!(parked.priority, 7);
    assert_eq!(parked.real_priority, 20);

    cq.dequeue(a).unwrap();
    assert_eq!(cq.get_head(), Some(b));
    let s = cq.state(b).unwrap();
    assert!(!s.need_repos);
    assert_eq!(s.priority, 20);
    assert_eq!(cq.base(), 20);
}

#[test]
fn min_priority_peeks_without_repositioning() {
    let mut cq = ClassQueue::new(8).unwrap();
    let a = cq.insert_node(1u32);
    let b = cq.insert_node(2u32);
    cq.enqueue(a, 0).unwrap();
    cq.enqueue(b, 20).unwrap();
    cq.dequeue(a).unwrap();
    let window = (cq.base(), cq.base_offset());

    assert_eq!(cq.get_min_priority(), Some(7));
    assert!(cq.state(b).unwrap().need_repos);
    assert_eq!((cq.base(), cq.base_offset()), window);

    // THE HEAD LOOKUP DOES THE RE-HOMING
    assert_eq!(cq.get_head(), Some(b));
    let s = cq.state(b).unwrap();
    assert!(!s.need_repos);
    assert_eq!(s.priority, 20);
    assert_eq!(cq.get_min_priority(), Some(20));
}

#[test]
fn window_at_top_of_range_saturates() {
    let mut cq = ClassQueue::new(8).unwrap();
    let a = cq.insert_node(1u32);
    let b = cq.insert_node(2u32);
    cq.enqueue(a, u64::MAX - 2).unwrap();
    cq.enqueue(b, u64::MAX).unwrap();

    let s = cq.state(b).unwrap();
    assert!(!s.need_repos);
    assert_eq!(s.priority, u64::MAX);
    assert_eq!(cq.get_head(), Some(a));
    assert_eq!(cq.queued_in_order(), vec![a, b]);
}

#[test]
fn beyond_window_repositions_as_base_advances() {
    let mut cq = ClassQueue::new(8).unwrap();
    let a = cq.insert_node(1u32);
    let b = cq.insert_node(2u32);
    let c = cq.insert_node(3u32);
    cq.enqueue(a, 0).unwrap();
    cq.enqueue(b, 20).unwrap();
    cq.enqueue(c, 7).unwrap();

    cq.dequeue(a).unwrap();
    // b SITS AHEAD OF c IN THE TOP BUCKET BUT IS RE-HOMED, NOT RETURNED
    assert_eq!(cq.get_head(), Some(c));
    assert_eq!(cq.base(), 7);
    let s = cq.state(b).unwrap();
    assert!(s.need_repos);
    assert_eq!(s.priority, 14);

    cq.dequeue(c).unwrap();
    assert_eq!(cq.get_head(), Some(b));
    let s = cq.state(b).unwrap();
    assert!(!s.need_repos);
    assert_eq!(s.priority, s.real_priority);
}

#[test]
fn dequeue_clears_repositioning_flag() {
    let mut cq = ClassQueue::new(8).unwrap();
    let a = cq.insert_node(1u32);
    let b = cq.insert_node(2u32);
    cq.enqueue(a, 0).unwrap();
    cq.enqueue(b, 100).unwrap();
    cq.dequeue(b).unwrap();
    assert!(!cq.state(b).unwrap().need_repos);
}

// === BASE ===

#[test]
fn base_only_moves_forward() {
    let mut cq = ClassQueue::new(16).unwrap();
    let a = cq.insert_node(1u32);
    let b = cq.insert_node(2u32);
    cq.enqueue(a, 100).unwrap();
    cq.enqueue(b, 104).unwrap();

    cq.dequeue(a).unwrap();
    cq.update_base();
    assert_eq!(cq.base(), 104);
    assert_eq!(cq.base_offset(), 4);

    // BELOW THE FLOOR: CLAMPED, BASE STAYS
    cq.enqueue(a, 90).unwrap();
    cq.update_base();
    assert_eq!(cq.base(), 104);
    assert_eq!(cq.get_head(), Some(a));

    cq.dequeue(a).unwrap();
    cq.dequeue(b).unwrap();
    cq.update_base();
    assert_eq!((cq.base(), cq.base_offset()), (0, 0));
}

#[test]
fn update_priority_round_robins_on_ties() {
    let mut cq = ClassQueue::new(16).unwrap();
    let a = cq.insert_node(1u32);
    let b = cq.insert_node(2u32);
    cq.enqueue(a, 3).unwrap();
    cq.enqueue(b, 3).unwrap();
    assert_eq!(cq.get_head(), Some(a));

    cq.update_priority(a, 3).unwrap();
    assert_eq!(cq.get_head(), Some(b));

    cq.update_priority(b, 5).unwrap();
    assert_eq!(cq.queued_in_order(), vec![a, b]);
}

#[test]
fn update_priority_of_idle_node_is_noop() {
    let mut cq = ClassQueue::new(16).unwrap();
    let a = cq.insert_node(1u32);
    cq.update_priority(a, 9).unwrap();
    assert!(!cq.is_queued(a));
    assert!(cq.is_empty());
}

// === CONTRACT ERRORS ===

#[test]
fn double_enqueue_and_idle_dequeue_rejected() {
    let mut cq = ClassQueue::new(16).unwrap();
    let a = cq.insert_node(1u32);
    assert_eq!(cq.dequeue(a), Err(SchedulerInvariantError::NotEnqueued));
    cq.enqueue(a, 1).unwrap();
    assert_eq!(cq.enqueue(a, 2), Err(SchedulerInvariantError::AlreadyEnqueued));
    assert_eq!(cq.len(), 1);
}

#[test]
fn removing_a_queued_node_dequeues_it() {
    let mut cq = ClassQueue::new(16).unwrap();
    let a = cq.insert_node(1u32);
    let b = cq.insert_node(2u32);
    cq.enqueue(a, 1).unwrap();
    cq.enqueue(b, 2).unwrap();
    assert_eq!(cq.remove_node(a), Ok(1));
    assert_eq!(cq.len(), 1);
    assert_eq!(cq.get_head(), Some(b));
    assert_eq!(cq.state(a), Err(SchedulerInvariantError::StaleHandle));
}

// === PROPERTY: HEAD IS THE LOWEST PRIORITY, FIFO ON TIES ===

#[test]
fn head_is_lowest_priority_fifo_on_ties() {
    const BASE: u64 = 1000;
    let mut rng = Rng(0x9E37_79B9_7F4A_7C15);
    let mut cq = ClassQueue::new(CLASSQUEUE_SIZE).unwrap();
    let handles: Vec<NodeHandle> = (0..32u32).map(|k| cq.insert_node(k)).collect();

    // (HANDLE, PRIORITY, ENQUEUE SEQUENCE)
    let mut model: Vec<(NodeHandle, u64, u64)> = Vec::new();
    let mut seq = 0u64;

    for _ in 0..5000 {
        let h = handles[rng.below(handles.len() as u64) as usize];
        if let Some(pos) = model.iter().position(|m| m.0 == h) {
            cq.dequeue(h).unwrap();
            model.remove(pos);
        } else {
            // AN EMPTY QUEUE RE-ANCHORS ITS WINDOW AT THE FIRST ENQUEUE
            let prio = if model.is_empty() {
                BASE
            } else {
                BASE + rng.below(CLASSQUEUE_SIZE as u64)
            };
            cq.enqueue(h, prio).unwrap();
            model.push((h, prio, seq));
            seq += 1;
        }

        let expected = model.iter()
            .min_by_key(|m| (m.1, m.2))
            .map(|m| m.0);
        assert_eq!(cq.get_head(), expected);
        assert_eq!(cq.len(), model.len());
    }
}
