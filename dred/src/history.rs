//! Reconstructing command list progress from an auto-breadcrumb command history.
//!
//! The runtime records every operation it issues to a command list into a ring of
//! [`AutoBreadcrumbsCommandHistoryMax`] slots, and keeps two counters: how many operations
//! were issued (`BreadcrumbCount`) and how many the GPU completed (`*pLastBreadcrumbValue`).
//! Both counters keep counting after the ring wraps, so the operation with logical index `i`
//! lives in slot `i % capacity` until it's overwritten.
//!
//! [`AutoBreadcrumbsCommandHistoryMax`]: dred_common::format::AutoBreadcrumbsCommandHistoryMax

use std::collections::HashMap;

use dred_common::format::D3D12_AUTO_BREADCRUMB_OP;

use crate::names::{enum_name, UNKNOWN_ENUM_NAME};

/// An annotation the application attached to one slot of a command history.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DredBreadcrumbContext {
    /// The slot this context belongs to.
    pub breadcrumb_index: u32,
    /// The annotation, or `None` if it couldn't be read.
    pub context: Option<String>,
}

/// Maps a command history slot to the context attached to it.
///
/// When more than one context names the same slot, the last one wins.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContextTable {
    positions: HashMap<u32, usize>,
}

impl ContextTable {
    pub fn build(contexts: &[DredBreadcrumbContext]) -> ContextTable {
        let positions = contexts
            .iter()
            .enumerate()
            .map(|(position, context)| (context.breadcrumb_index, position))
            .collect();
        ContextTable { positions }
    }

    /// The position in the context array of the context for `slot`.
    pub fn lookup(&self, slot: u64) -> Option<usize> {
        let slot = u32::try_from(slot).ok()?;
        self.positions.get(&slot).copied()
    }
}

/// How much history was lost to the ring wrapping.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HistoryOverflow {
    /// Operations issued but no longer in the ring.
    pub total_dropped: u64,
    /// Of the completed operations, how many are no longer in the ring.
    pub completed_dropped: u64,
}

/// A snapshot of one command history: both counters and the contents of the ring.
///
/// The snapshot is taken once, so views over it agree with each other even if the
/// process memory it came from is still changing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandHistory {
    capacity: u64,
    issued: u64,
    completed: u64,
    slots: Vec<u32>,
    contexts: Vec<DredBreadcrumbContext>,
    context_table: ContextTable,
}

impl CommandHistory {
    /// Make a snapshot of a ring of `capacity` slots.
    ///
    /// `slots` holds as many of the ring's slots as could be read, starting with slot 0.
    /// A `completed` counter greater than `issued` is clamped to `issued`.
    pub fn new(
        capacity: u32,
        issued: u32,
        completed: u32,
        slots: Vec<u32>,
        contexts: Vec<DredBreadcrumbContext>,
    ) -> CommandHistory {
        let context_table = ContextTable::build(&contexts);
        CommandHistory {
            capacity: u64::from(capacity),
            issued: u64::from(issued),
            completed: u64::from(completed.min(issued)),
            slots,
            contexts,
            context_table,
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// The number of operations ever issued (`BreadcrumbCount`).
    pub fn issued(&self) -> u64 {
        self.issued
    }

    /// The number of operations the GPU completed (`*pLastBreadcrumbValue`).
    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// The number of operations issued but not completed.
    pub fn outstanding(&self) -> u64 {
        self.issued.saturating_sub(self.completed)
    }

    /// The contexts attached to this history, in the order the runtime stored them.
    pub fn contexts(&self) -> &[DredBreadcrumbContext] {
        &self.contexts
    }

    /// What the ring wrapping cost, or `None` if every issued operation is still there.
    pub fn overflow(&self) -> Option<HistoryOverflow> {
        if self.issued <= self.capacity {
            return None;
        }
        let total_dropped = self.issued - self.capacity;
        Some(HistoryOverflow {
            total_dropped,
            completed_dropped: self.completed.saturating_sub(total_dropped),
        })
    }

    /// How many outstanding operations are no longer in the ring.
    pub fn outstanding_dropped(&self) -> u64 {
        self.outstanding().saturating_sub(self.capacity)
    }

    /// The completed operations, most recent first.
    pub fn completed_ops(&self) -> CompletedOps<'_> {
        CompletedOps {
            history: self,
            count: 0,
            len: self.completed.min(self.capacity),
        }
    }

    /// The outstanding operations that are still in the ring, oldest first.
    pub fn outstanding_ops(&self) -> OutstandingOps<'_> {
        let start = self
            .completed
            .max(self.issued.saturating_sub(self.capacity));
        OutstandingOps {
            history: self,
            index: start,
            end: self.issued,
        }
    }

    fn op_at(&self, index: u64) -> BreadcrumbOp<'_> {
        let slot = index % self.capacity;
        let op = usize::try_from(slot)
            .ok()
            .and_then(|slot| self.slots.get(slot))
            .copied();
        let context = self
            .context_table
            .lookup(slot)
            .and_then(|position| self.contexts.get(position))
            .and_then(|context| context.context.as_deref());
        BreadcrumbOp {
            index,
            slot,
            op,
            context,
        }
    }
}

/// One operation of a command history.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BreadcrumbOp<'h> {
    /// The operation's position in everything issued to the command list.
    pub index: u64,
    /// The ring slot holding the operation.
    pub slot: u64,
    /// The raw `D3D12_AUTO_BREADCRUMB_OP`, or `None` if the slot couldn't be read.
    pub op: Option<u32>,
    /// The context attached to `slot`, if any.
    pub context: Option<&'h str>,
}

impl BreadcrumbOp<'_> {
    /// The name of the operation, e.g. `D3D12_AUTO_BREADCRUMB_OP_DRAWINSTANCED`.
    pub fn op_name(&self) -> &'static str {
        self.op
            .map(enum_name::<D3D12_AUTO_BREADCRUMB_OP>)
            .unwrap_or(UNKNOWN_ENUM_NAME)
    }
}

/// Iterator over completed operations, see [`CommandHistory::completed_ops`].
#[derive(Clone, Debug)]
pub struct CompletedOps<'h> {
    history: &'h CommandHistory,
    count: u64,
    len: u64,
}

impl<'h> Iterator for CompletedOps<'h> {
    type Item = BreadcrumbOp<'h>;

    fn next(&mut self) -> Option<BreadcrumbOp<'h>> {
        if self.count >= self.len {
            return None;
        }
        let index = self.history.completed - self.count - 1;
        self.count += 1;
        Some(self.history.op_at(index))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = usize::try_from(self.len - self.count).unwrap_or(usize::MAX);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for CompletedOps<'_> {}

/// Iterator over outstanding operations, see [`CommandHistory::outstanding_ops`].
#[derive(Clone, Debug)]
pub struct OutstandingOps<'h> {
    history: &'h CommandHistory,
    index: u64,
    end: u64,
}

impl<'h> Iterator for OutstandingOps<'h> {
    type Item = BreadcrumbOp<'h>;

    fn next(&mut self) -> Option<BreadcrumbOp<'h>> {
        if self.index >= self.end {
            return None;
        }
        let op = self.history.op_at(self.index);
        self.index += 1;
        Some(op)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = usize::try_from(self.end - self.index).unwrap_or(usize::MAX);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for OutstandingOps<'_> {}
