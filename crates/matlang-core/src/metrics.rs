//! Process-wide profiling counters and timers.
//!
//! Counters are plain named integers; timers accumulate wall-clock time
//! across start/stop pairs. Both are cheap enough to leave enabled -- the
//! JIT and the analyses record into them unconditionally and the CLI
//! reports them when `verbose` is set.

use std::collections::HashMap;
use std::sync::{LazyLock, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Total statements counted by the metrics analysis.
pub const METRIC_NUM_STMTS: &str = "metric-num-stmts";
/// Maximum loop nesting depth seen by the metrics analysis.
pub const METRIC_MAX_LOOP_DEPTH: &str = "metric-max-loop-depth";
/// Call sites counted by the metrics analysis.
pub const METRIC_NUM_CALL_SITES: &str = "metric-num-call-sites";
/// Functions JIT-compiled at least once.
pub const FUNC_COMP_COUNT: &str = "func-comp-count";
/// Compiled function versions.
pub const FUNC_VERS_COUNT: &str = "func-vers-count";
/// Matrix copies inserted by copy placement.
pub const ARRAY_COPY_COUNT: &str = "array-copy-count";
/// Heap objects allocated.
pub const HEAP_OBJ_COUNT: &str = "heap-obj-count";
/// Total time in analyses.
pub const ANA_TIME_TOTAL: &str = "ana-time-total";
/// Total time in JIT compilation.
pub const COMP_TIME_TOTAL: &str = "comp-time-total";

#[derive(Default)]
struct Registry {
    counters: HashMap<&'static str, u64>,
    timers: HashMap<&'static str, TimerState>,
}

#[derive(Default)]
struct TimerState {
    accumulated: Duration,
    started: Option<Instant>,
}

static REGISTRY: LazyLock<Mutex<Registry>> = LazyLock::new(|| Mutex::new(Registry::default()));

/// Reads a counter (0 if never written).
pub fn get_counter(name: &'static str) -> u64 {
    let reg = REGISTRY.lock().expect("metrics registry poisoned");
    reg.counters.get(name).copied().unwrap_or(0)
}

/// Sets a counter to an absolute value.
pub fn set_counter(name: &'static str, value: u64) {
    let mut reg = REGISTRY.lock().expect("metrics registry poisoned");
    reg.counters.insert(name, value);
}

/// Adds `by` to a counter.
pub fn incr_counter(name: &'static str, by: u64) {
    let mut reg = REGISTRY.lock().expect("metrics registry poisoned");
    *reg.counters.entry(name).or_insert(0) += by;
}

/// Raises a counter to `value` if the current value is lower.
pub fn max_counter(name: &'static str, value: u64) {
    let mut reg = REGISTRY.lock().expect("metrics registry poisoned");
    let entry = reg.counters.entry(name).or_insert(0);
    *entry = (*entry).max(value);
}

/// Starts (or restarts) a named timer.
pub fn start_timer(name: &'static str) {
    let mut reg = REGISTRY.lock().expect("metrics registry poisoned");
    reg.timers.entry(name).or_default().started = Some(Instant::now());
}

/// Stops a named timer, accumulating the elapsed time. Stopping a timer
/// that is not running is a no-op.
pub fn stop_timer(name: &'static str) {
    let mut reg = REGISTRY.lock().expect("metrics registry poisoned");
    if let Some(state) = reg.timers.get_mut(name) {
        if let Some(started) = state.started.take() {
            state.accumulated += started.elapsed();
        }
    }
}

/// Accumulated seconds for a named timer.
pub fn timer_secs(name: &'static str) -> f64 {
    let reg = REGISTRY.lock().expect("metrics registry poisoned");
    reg.timers
        .get(name)
        .map(|t| t.accumulated.as_secs_f64())
        .unwrap_or(0.0)
}

/// Snapshot of all counters and timer totals, for the verbose report.
#[derive(Debug, Serialize)]
pub struct Snapshot {
    pub counters: Vec<(String, u64)>,
    pub timers: Vec<(String, f64)>,
}

pub fn snapshot() -> Snapshot {
    let reg = REGISTRY.lock().expect("metrics registry poisoned");
    let mut counters: Vec<(String, u64)> = reg
        .counters
        .iter()
        .map(|(&k, &v)| (k.to_string(), v))
        .collect();
    counters.sort();
    let mut timers: Vec<(String, f64)> = reg
        .timers
        .iter()
        .map(|(&k, t)| (k.to_string(), t.accumulated.as_secs_f64()))
        .collect();
    timers.sort_by(|a, b| a.0.cmp(&b.0));
    Snapshot { counters, timers }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_incr_and_set() {
        set_counter("test-counter-a", 5);
        incr_counter("test-counter-a", 3);
        assert_eq!(get_counter("test-counter-a"), 8);
    }

    #[test]
    fn unset_counter_reads_zero() {
        assert_eq!(get_counter("test-counter-unset"), 0);
    }

    #[test]
    fn max_counter_keeps_high_water_mark() {
        set_counter("test-counter-max", 4);
        max_counter("test-counter-max", 2);
        assert_eq!(get_counter("test-counter-max"), 4);
        max_counter("test-counter-max", 9);
        assert_eq!(get_counter("test-counter-max"), 9);
    }

    #[test]
    fn timer_accumulates() {
        start_timer("test-timer");
        stop_timer("test-timer");
        // Elapsed is tiny but non-negative; stopping again is a no-op.
        stop_timer("test-timer");
        assert!(timer_secs("test-timer") >= 0.0);
    }
}
