// CKRM EVENT LOG
// RECORDS HOUSEKEEPING SNAPSHOTS WHILE THE SCHEDULER RUNS
// PRE-ALLOCATED RING BUFFER. NO HEAP ALLOCATION WHILE RECORDING.
// WRAPS AROUND AT CAPACITY -- OLDEST ENTRIES OVERWRITTEN.

use std::io::{self, Write};

const MAX_SNAPSHOTS: usize = 8192;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub wall_ns:      u64,   // CLOCK_MONOTONIC WHEN RECORDED
    pub sim_ns:       u64,   // SCHEDULER TIME THE SNAPSHOT DESCRIBES
    pub switches:     u64,
    pub idle_slices:  u64,
    pub queued:       u64,   // QUEUED (CLASS, CPU) PAIRS
    pub max_pressure: i64,
    pub busiest_cpu:  u32,
    pub credited:     u64,   // SAVINGS CREDITED BY HOUSEKEEPING
}

pub struct EventLog {
    snapshots: Vec<Snapshot>,
    head:      usize,
    len:       usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            snapshots: vec![Snapshot::default(); MAX_SNAPSHOTS],
            head: 0,
            len: 0,
        }
    }

    pub fn len(&self) -> usize { self.len }
    pub fn is_empty(&self) -> bool { self.len == 0 }

    // RECORD ONE SNAPSHOT. wall_ns IS STAMPED HERE.
    // OVERWRITES OLDEST ENTRY WHEN FULL.
    pub fn record(&mut self, mut snap: Snapshot) {
        snap.wall_ns = now_ns();
        self.snapshots[self.head] = snap;
        self.head = (self.head + 1) % MAX_SNAPSHOTS;
        if self.len < MAX_SNAPSHOTS {
            self.len += 1;
        }
    }

    // ITERATE SNAPSHOTS IN CHRONOLOGICAL ORDER
    pub fn iter_chronological(&self) -> impl Iterator<Item = &Snapshot> {
        let start = if self.len < MAX_SNAPSHOTS { 0 } else { self.head };
        (0..self.len).map(move |i| {
            &self.snapshots[(start + i) % MAX_SNAPSHOTS]
        })
    }

    // DUMP THE TIME SERIES AFTER EXECUTION
    pub fn dump(&self) {
        if self.len == 0 {
            return;
        }

        println!("\n{:<10} {:<10} {:<10} {:<8} {:<10} {:<8} {:<12}",
            "TIME_S", "SWITCHES", "IDLE", "QUEUED", "PRESSURE", "BUSIEST", "CREDITED");
        println!("{}", "-".repeat(74));

        for s in self.iter_chronological() {
            println!("{:<10.1} {:<10} {:<10} {:<8} {:<10} {:<8} {:<12}",
                s.sim_ns as f64 / 1_000_000_000.0, s.switches, s.idle_slices,
                s.queued, s.max_pressure, s.busiest_cpu, s.credited);
        }

        if self.len == MAX_SNAPSHOTS {
            println!("\n(RING BUFFER WRAPPED -- SHOWING MOST RECENT {} SNAPSHOTS)", MAX_SNAPSHOTS);
        }
        println!("TOTAL SNAPSHOTS: {}", self.len);
    }

    // SUMMARY STATISTICS
    pub fn summary(&self) {
        let (first, last) = match (self.iter_chronological().next(), self.iter_chronological().last()) {
            (Some(f), Some(l)) if self.len >= 2 => (f, l),
            _ => return,
        };

        let total_sw: u64 = self.iter_chronological().map(|s| s.switches).sum();
        let total_idle: u64 = self.iter_chronological().map(|s| s.idle_slices).sum();
        let total_credit: u64 = self.iter_chronological().map(|s| s.credited).sum();
        let peak_p = self.iter_chronological().map(|s| s.max_pressure).max().unwrap_or(0);

        let elapsed_s = last.sim_ns.saturating_sub(first.sim_ns) as f64 / 1_000_000_000.0;
        let wall_s = last.wall_ns.saturating_sub(first.wall_ns) as f64 / 1_000_000_000.0;

        println!("\n{}", "=".repeat(50));
        println!("CKRM SUMMARY");
        println!("{}", "=".repeat(50));
        println!("  TOTAL SWITCHES:    {}", total_sw);
        println!("  IDLE SLICES:       {}", total_idle);
        println!("  PEAK PRESSURE:     {}", peak_p);
        println!("  SAVINGS CREDITED:  {}ns", total_credit);
        if elapsed_s > 0.0 {
            println!("  AVG SWITCHES/S:    {:.0}", total_sw as f64 / elapsed_s);
            let idle_pct = total_idle as f64 / (total_idle + total_sw).max(1) as f64 * 100.0;
            println!("  IDLE RATE:         {:.1}%", idle_pct);
        }
        println!("  SIMULATED:         {:.1}s", elapsed_s);
        println!("  WALL:              {:.3}s", wall_s);
        println!("  SAMPLES:           {}", self.len);
    }

    // CSV, ONE ROW PER SNAPSHOT, OLDEST FIRST
    pub fn write_csv<W: Write>(&self, mut out: W) -> io::Result<()> {
        writeln!(out, "wall_ns,sim_ns,switches,idle_slices,queued,max_pressure,busiest_cpu,credited")?;
        for s in self.iter_chronological() {
            writeln!(out, "{},{},{},{},{},{},{},{}",
                s.wall_ns, s.sim_ns, s.switches, s.idle_slices,
                s.queued, s.max_pressure, s.busiest_cpu, s.credited)?;
        }
        out.flush()
    }
}

pub fn now_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    (ts.tv_sec as u64) * 1_000_000_000 + (ts.tv_nsec as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(sim_ns: u64, switches: u64) -> Snapshot {
        Snapshot { sim_ns, switches, ..Snapshot::default() }
    }

    #[test]
    fn record_stamps_wall_clock() {
        let mut log = EventLog::new();
        assert!(log.is_empty());

        log.record(Snapshot { switches: 100, queued: 3, max_pressure: -4, ..Snapshot::default() });
        assert_eq!(log.len(), 1);
        assert_eq!(log.snapshots[0].switches, 100);
        assert_eq!(log.snapshots[0].queued, 3);
        assert_eq!(log.snapshots[0].max_pressure, -4);
        assert!(log.snapshots[0].wall_ns > 0);
    }

    #[test]
    fn ring_buffer_wraps() {
        let mut log = EventLog::new();

        for i in 0..MAX_SNAPSHOTS {
            log.record(snap(i as u64, i as u64));
        }
        assert_eq!(log.len(), MAX_SNAPSHOTS);
        assert_eq!(log.head, 0);

        log.record(snap(0, 9999));
        assert_eq!(log.len(), MAX_SNAPSHOTS);
        assert_eq!(log.head, 1);
        assert_eq!(log.snapshots[0].switches, 9999);

        let ordered: Vec<u64> = log.iter_chronological()
            .map(|s| s.switches)
            .collect();
        assert_eq!(ordered[0], 1);
        assert_eq!(ordered.last().copied(), Some(9999));
        assert_eq!(ordered.len(), MAX_SNAPSHOTS);
    }

    #[test]
    fn summary_and_dump_tolerate_short_logs() {
        let mut log = EventLog::new();
        log.summary();
        log.dump();
        log.record(snap(0, 1));
        log.summary();
        log.record(snap(1_000_000_000, 2));
        log.dump();
        log.summary();
    }

    #[test]
    fn csv_has_header_and_rows() {
        let mut log = EventLog::new();
        log.record(snap(100, 7));
        log.record(snap(200, 8));
        let mut buf = Vec::new();
        log.write_csv(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("wall_ns,sim_ns,"));
        assert!(lines[1].contains(",100,7,"));
        assert!(lines[2].contains(",200,8,"));
    }
}
