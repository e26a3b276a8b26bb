//! Per-stack memory arenas with pluggable allocation policies.
//!
//! The runtime partitions its working memory into a handful of stacks, one
//! per concern ([`StackId`]). Each stack hands out address offsets inside its
//! own region and never sees another stack's addresses; freeing an address a
//! stack did not allocate is rejected. The policy behind a stack is chosen
//! per stack in the configuration:
//!
//! - [`AllocatorKind::LinearStatic`]: bump pointer, free is a no-op, `reset`
//!   reclaims everything at once.
//! - [`AllocatorKind::FreeListStatic`]: fixed capacity with a free list,
//!   first-fit or best-fit.
//! - [`AllocatorKind::FreeListDynamic`]: free list that grows its region when
//!   exhausted instead of failing.
//! - [`AllocatorKind::Generic`]: unbounded bump pointer with live-block
//!   tracking, for stacks whose peak is unknown up front.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Identifies one of the runtime's memory stacks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StackId {
    General,
    Archi,
    ExprParser,
    Transfo,
    Schedule,
    Runtime,
}

impl StackId {
    /// All stacks, in declaration order.
    pub const ALL: [StackId; 6] = [
        StackId::General,
        StackId::Archi,
        StackId::ExprParser,
        StackId::Transfo,
        StackId::Schedule,
        StackId::Runtime,
    ];
}

/// Fit strategy for free-list policies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitPolicy {
    #[default]
    FirstFit,
    BestFit,
}

/// Allocation policy behind a stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocatorKind {
    LinearStatic { capacity: usize },
    FreeListStatic { capacity: usize, fit: FitPolicy },
    FreeListDynamic { fit: FitPolicy },
    Generic,
}

impl Default for AllocatorKind {
    fn default() -> Self {
        AllocatorKind::Generic
    }
}

const ALIGNMENT: usize = 8;

fn align_up(size: usize) -> usize {
    size.div_ceil(ALIGNMENT) * ALIGNMENT
}

#[derive(Clone, Copy, Debug)]
struct FreeBlock {
    address: usize,
    size: usize,
}

/// One memory arena. Addresses are offsets local to the stack.
#[derive(Debug)]
pub struct Stack {
    id: StackId,
    kind: AllocatorKind,
    capacity: usize,
    cursor: usize,
    used: usize,
    peak: usize,
    free_list: Vec<FreeBlock>,
    live: HashMap<usize, usize>,
}

impl Stack {
    pub fn new(id: StackId, kind: AllocatorKind) -> Self {
        let capacity = match kind {
            AllocatorKind::LinearStatic { capacity } | AllocatorKind::FreeListStatic { capacity, .. } => capacity,
            AllocatorKind::FreeListDynamic { .. } | AllocatorKind::Generic => usize::MAX,
        };
        Stack {
            id,
            kind,
            capacity,
            cursor: 0,
            used: 0,
            peak: 0,
            free_list: Vec::new(),
            live: HashMap::new(),
        }
    }

    pub fn id(&self) -> StackId {
        self.id
    }

    /// Bytes currently handed out.
    pub fn used(&self) -> usize {
        self.used
    }

    /// Highest `used` value seen since the last `reset`.
    pub fn peak(&self) -> usize {
        self.peak
    }

    /// Allocate `size` bytes, returning a stack-local address.
    pub fn allocate(&mut self, size: usize) -> Result<usize> {
        if size == 0 {
            return Ok(self.cursor);
        }
        let size = align_up(size);
        let address = match self.kind {
            AllocatorKind::LinearStatic { .. } | AllocatorKind::Generic => self.bump(size)?,
            AllocatorKind::FreeListStatic { fit, .. } | AllocatorKind::FreeListDynamic { fit } => {
                match self.take_free(size, fit) {
                    Some(addr) => addr,
                    None => self.bump(size)?,
                }
            }
        };
        self.live.insert(address, size);
        self.used += size;
        self.peak = self.peak.max(self.used);
        Ok(address)
    }

    /// Return a block to the stack. Linear stacks only drop the bookkeeping;
    /// free-list stacks make the range reusable.
    pub fn deallocate(&mut self, address: usize) -> Result<()> {
        let Some(size) = self.live.remove(&address) else {
            return Err(Error::ForeignFree {
                stack: self.id,
                address,
            });
        };
        self.used -= size;
        if matches!(
            self.kind,
            AllocatorKind::FreeListStatic { .. } | AllocatorKind::FreeListDynamic { .. }
        ) {
            self.free_list.push(FreeBlock { address, size });
            self.coalesce();
        }
        Ok(())
    }

    /// Drop every live block and rewind the cursor.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.used = 0;
        self.free_list.clear();
        self.live.clear();
    }

    fn bump(&mut self, size: usize) -> Result<usize> {
        let available = self.capacity.saturating_sub(self.cursor);
        if size > available {
            tracing::debug!(stack = ?self.id, requested = size, available, "stack exhausted");
            return Err(Error::OutOfStack {
                stack: self.id,
                requested: size,
                available,
            });
        }
        let address = self.cursor;
        self.cursor += size;
        Ok(address)
    }

    fn take_free(&mut self, size: usize, fit: FitPolicy) -> Option<usize> {
        let candidate = match fit {
            FitPolicy::FirstFit => self.free_list.iter().position(|b| b.size >= size),
            FitPolicy::BestFit => self
                .free_list
                .iter()
                .enumerate()
                .filter(|(_, b)| b.size >= size)
                .min_by_key(|(_, b)| b.size)
                .map(|(ix, _)| ix),
        }?;
        let block = self.free_list.swap_remove(candidate);
        if block.size > size {
            self.free_list.push(FreeBlock {
                address: block.address + size,
                size: block.size - size,
            });
        }
        Some(block.address)
    }

    fn coalesce(&mut self) {
        self.free_list.sort_by_key(|b| b.address);
        let mut merged: Vec<FreeBlock> = Vec::with_capacity(self.free_list.len());
        for block in self.free_list.drain(..) {
            match merged.last_mut() {
                Some(last) if last.address + last.size == block.address => last.size += block.size,
                _ => merged.push(block),
            }
        }
        self.free_list = merged;
    }
}

/// The set of stacks the runtime works with, one per [`StackId`].
#[derive(Debug)]
pub struct StackSet {
    stacks: Vec<Stack>,
}

impl StackSet {
    /// Build the stacks from a per-stack policy choice. Ids missing from
    /// `kinds` get the [`AllocatorKind::Generic`] policy.
    pub fn new(kinds: &HashMap<StackId, AllocatorKind>) -> Self {
        let stacks = StackId::ALL
            .iter()
            .map(|id| Stack::new(*id, kinds.get(id).copied().unwrap_or_default()))
            .collect();
        StackSet { stacks }
    }

    pub fn stack(&mut self, id: StackId) -> &mut Stack {
        let ix = StackId::ALL.iter().position(|s| *s == id).expect("known stack id");
        &mut self.stacks[ix]
    }
}

impl Default for StackSet {
    fn default() -> Self {
        StackSet::new(&HashMap::new())
    }
}
