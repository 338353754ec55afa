//! Control-block accounting, for diagnosing leaks and double frees.
//!
//! Every block creation, pointee destruction, and block deallocation is
//! tallied twice: once in a thread-local ledger and once in a process-wide
//! one. The thread-local side is what tests lean on, since it is immune to
//! traffic from other threads.

use std::cell::Cell;

use lazy_static::lazy_static;
use parking_lot::Mutex;

/// Running totals of control-block traffic.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stats
{
    /// Control blocks allocated.
    pub blocks_created: usize,

    /// Control blocks whose storage has been released.
    pub blocks_freed: usize,

    /// Managed objects destroyed.
    pub objects_destroyed: usize,
}

impl Stats
{
    /// Blocks currently alive: created minus freed.
    pub fn live_blocks(&self) -> usize { self.blocks_created - self.blocks_freed }

    /// Objects whose destructor has not yet run.
    pub fn live_objects(&self) -> usize { self.blocks_created - self.objects_destroyed }
}

thread_local! {
    static LOCAL: Cell<Stats> = Cell::new(Stats::default());
}

lazy_static! {
    static ref GLOBAL: Mutex<Stats> = Mutex::new(Stats::default());
}

/// Totals for the calling thread's handles.
pub fn thread_stats() -> Stats { LOCAL.with(Cell::get) }

/// Totals across every thread in the process.
pub fn global_stats() -> Stats { *GLOBAL.lock() }

fn tally(apply: impl Fn(&mut Stats))
{
    LOCAL.with(|cell| {
        let mut stats = cell.get();
        apply(&mut stats);
        cell.set(stats);
    });
    apply(&mut GLOBAL.lock());
}

pub(crate) fn block_created() { tally(|stats| stats.blocks_created += 1) }

pub(crate) fn block_freed() { tally(|stats| stats.blocks_freed += 1) }

pub(crate) fn object_destroyed() { tally(|stats| stats.objects_destroyed += 1) }
