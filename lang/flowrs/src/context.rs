// Copyright 2022 Oxide Computer Company

//! Execution context consulted by context-keyed levels.
//!
//! Worker threads announce which core they run on once, before they start
//! classifying packets. Threads that never do are treated as core 0.

use std::cell::Cell;

thread_local! {
    static CURRENT_CPU: Cell<u32> = const { Cell::new(0) };
}

pub fn current_cpu_id() -> u32 {
    CURRENT_CPU.with(|c| c.get())
}

pub fn set_current_cpu_id(id: u32) {
    CURRENT_CPU.with(|c| c.set(id));
}
