// CKRM WORKLOAD PARSING TESTS
// CLASS SPEC STRINGS, WORKLOAD FILES, VALIDATION
//
// ALL TESTS USE PURE-RUST TYPES FROM ckrm_sched::workload. RUN OFFLINE.

use std::fs;

use ckrm_sched::sim::{SimConfig, Simulation};
use ckrm_sched::tuning::NSEC_PER_SEC;
use ckrm_sched::workload::{load_workload, parse_workload, ClassSpec};

#[test]
fn full_spec_parses() {
    let s = ClassSpec::parse("db.primary:768:100:256").unwrap();
    assert_eq!(s.name, "db.primary");
    assert_eq!(s.weight, 768);
    assert_eq!(s.demand_pct, 100);
    assert_eq!(s.guarantee, 256);
    assert_eq!(s, ClassSpec::new("db.primary", 768).with_guarantee(256));
}

#[test]
fn surrounding_whitespace_ignored() {
    let s = ClassSpec::parse("  batch:256:40 ").unwrap();
    assert_eq!(s, ClassSpec::new("batch", 256).with_demand(40));
}

#[test]
fn malformed_specs_rejected() {
    for bad in ["", "web", "web:", ":512", "web:abc", "web:512:", "9web:512", "web:512:50:10:1", "w b:1"] {
        assert!(ClassSpec::parse(bad).is_err(), "accepted '{}'", bad);
    }
}

#[test]
fn out_of_range_values_rejected() {
    let msg = |s: &str| format!("{:#}", ClassSpec::parse(s).unwrap_err());
    assert!(msg("web:0").contains("weight 0"));
    assert!(msg("web:1025").contains("weight 1025"));
    assert!(msg("web:512:101").contains("above 100%"));
    assert!(msg("web:256:100:512").contains("guarantee 512"));
    assert!(ClassSpec::parse("web:99999999999").is_err());
}

#[test]
fn workload_errors_name_the_line() {
    let err = parse_workload("web:512\n# ok\nbatch:oops\n").unwrap_err();
    assert!(format!("{:#}", err).contains("line 3"));

    let dup = parse_workload("web:512\nweb:256\n").unwrap_err();
    assert!(format!("{:#}", dup).contains("duplicate class 'web'"));
}

#[test]
fn empty_workload_is_empty() {
    assert!(parse_workload("# nothing here\n\n   \n").unwrap().is_empty());
}

#[test]
fn workload_file_round_trip_through_simulator() {
    let path = std::env::temp_dir().join(format!("ckrm-workload-{}.txt", std::process::id()));
    fs::write(&path, "# two tenants\nweb:512\nbatch:512:30\n").unwrap();
    let specs = load_workload(&path).unwrap();
    fs::remove_file(&path).unwrap();
    assert_eq!(specs.len(), 2);

    let mut sim = Simulation::new(SimConfig::default(), &specs).unwrap();
    sim.run_for(2 * NSEC_PER_SEC, None).unwrap();
    let usage = sim.usage();
    assert_eq!(usage[0].name, "web");
    assert!(usage[0].received_ns > usage[1].received_ns);
}

#[test]
fn missing_workload_file_reports_path() {
    let err = load_workload(std::path::Path::new("/nonexistent/ckrm.workload")).unwrap_err();
    assert!(format!("{:#}", err).contains("/nonexistent/ckrm.workload"));
}
