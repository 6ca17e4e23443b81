pub mod check;
pub mod run;

use std::sync::atomic::AtomicBool;

// SET BY THE CTRL+C HANDLER, POLLED BETWEEN SIMULATED SECONDS
pub static SHUTDOWN: AtomicBool = AtomicBool::new(false);
