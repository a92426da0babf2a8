//! Sequential and parallel composition.
//!
//! Two forms of the same arithmetic:
//!
//! - Scoped builders on [`Session`]. A parallel scope snapshots the entry
//!   cursor, rewinds to it for every branch, and commits entry plus the
//!   longest branch on exit. Sequential is plain accumulation.
//! - A [`Block`] tree, evaluated bottom-up by [`Block::plan`] to get the total
//!   duration and every leaf's start in one pass, and emitted through the
//!   builders by [`Session::execute`].
//!
//! Composition only rearranges timestamps. Underflow and ordering are still
//! checked by each leaf emission.

use crate::channel::{GateHandle, TtlInOut, TtlOut};
use crate::controller::RtioController;
use crate::session::Session;
use rtio_common::error::RtioResult;
use rtio_common::time::Mu;
use tracing::trace;

/// Scope handed to the body of [`Session::parallel`].
pub struct ParallelScope<'a, C: RtioController> {
    session: &'a mut Session<C>,
    entry: Mu,
    end: Mu,
    branches: usize,
}

impl<C: RtioController> ParallelScope<'_, C> {
    /// Cursor value on entry to the block.
    pub fn entry(&self) -> Mu {
        self.entry
    }

    /// Latest branch end so far.
    pub fn end(&self) -> Mu {
        self.end
    }

    /// Run one branch starting at the entry cursor.
    ///
    /// # Errors
    ///
    /// Propagates the branch error, leaving the cursor where it failed.
    pub fn branch<T>(
        &mut self,
        body: impl FnOnce(&mut Session<C>) -> RtioResult<T>,
    ) -> RtioResult<T> {
        self.session.cursor = self.entry;
        let value = body(self.session)?;
        self.end = self.end.max(self.session.cursor);
        self.branches += 1;
        Ok(value)
    }
}

impl<C: RtioController> Session<C> {
    /// Run `body` in sequential mode.
    ///
    /// Every operation starts where the previous one left the cursor.
    ///
    /// # Errors
    ///
    /// Propagates the body error.
    pub fn sequential<T>(
        &mut self,
        body: impl FnOnce(&mut Self) -> RtioResult<T>,
    ) -> RtioResult<T> {
        body(self)
    }

    /// Run `body` in parallel mode.
    ///
    /// On success the cursor is the entry value plus the longest branch;
    /// a scope with no branches leaves it unchanged.
    ///
    /// # Errors
    ///
    /// Propagates the first branch error without committing the exit cursor.
    pub fn parallel<T>(
        &mut self,
        body: impl FnOnce(&mut ParallelScope<'_, C>) -> RtioResult<T>,
    ) -> RtioResult<T> {
        let entry = self.cursor;
        let mut scope = ParallelScope {
            session: self,
            entry,
            end: entry,
            branches: 0,
        };
        let value = body(&mut scope)?;
        let (end, branches) = (scope.end, scope.branches);

        self.cursor = end;
        trace!(entry, end, branches, "Parallel block committed");
        Ok(value)
    }

    /// Emit a block tree.
    ///
    /// Returns the gate handles of every gate leaf, in plan order.
    ///
    /// # Errors
    ///
    /// Propagates the first leaf error.
    pub fn execute(&mut self, block: &Block) -> RtioResult<Vec<GateHandle>> {
        let mut gates = Vec::new();
        self.execute_into(block, &mut gates)?;
        Ok(gates)
    }

    fn execute_into(&mut self, block: &Block, gates: &mut Vec<GateHandle>) -> RtioResult<()> {
        match block {
            Block::Leaf(op) => self.execute_op(op, gates),
            Block::Sequential(children) => self.sequential(|s| {
                for child in children {
                    s.execute_into(child, gates)?;
                }
                Ok(())
            }),
            Block::Parallel(children) => self.parallel(|p| {
                for child in children {
                    p.branch(|s| s.execute_into(child, gates))?;
                }
                Ok(())
            }),
        }
    }

    fn execute_op(&mut self, op: &Op, gates: &mut Vec<GateHandle>) -> RtioResult<()> {
        match op {
            Op::Pulse { output, width } => output.pulse_mu(self, *width),
            Op::Delay(duration) => {
                self.advance(*duration);
                Ok(())
            }
            Op::Gate { input, window } => {
                gates.push(input.gate_rising_mu(self, *window)?);
                Ok(())
            }
        }
    }
}

/// A leaf operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// Rising edge, `width` mu, falling edge.
    Pulse {
        /// Output channel.
        output: TtlOut,
        /// High time in mu.
        width: Mu,
    },
    /// Cursor advance with no emission.
    Delay(Mu),
    /// Rising-edge gate of `window` mu.
    Gate {
        /// Input channel.
        input: TtlInOut,
        /// Gate length in mu.
        window: Mu,
    },
}

impl Op {
    /// How far the operation moves the cursor.
    #[must_use]
    pub fn duration(&self) -> Mu {
        match self {
            Self::Pulse { width, .. } => *width,
            Self::Delay(duration) => *duration,
            Self::Gate { window, .. } => *window,
        }
    }
}

/// Composition tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    /// A single operation.
    Leaf(Op),
    /// Children one after another.
    Sequential(Vec<Block>),
    /// Children from the same start.
    Parallel(Vec<Block>),
}

/// A leaf with its absolute start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedLeaf<'a> {
    /// Cursor value when the leaf starts.
    pub start: Mu,
    /// The leaf.
    pub op: &'a Op,
}

/// Result of [`Block::plan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan<'a> {
    /// Total cursor advance of the block.
    pub duration: Mu,
    /// Leaves in emission order.
    pub leaves: Vec<PlannedLeaf<'a>>,
}

impl Block {
    /// Pulse leaf.
    #[must_use]
    pub fn pulse(output: TtlOut, width: Mu) -> Self {
        Self::Leaf(Op::Pulse { output, width })
    }

    /// Delay leaf.
    #[must_use]
    pub fn delay(duration: Mu) -> Self {
        Self::Leaf(Op::Delay(duration))
    }

    /// Gate leaf.
    #[must_use]
    pub fn gate(input: TtlInOut, window: Mu) -> Self {
        Self::Leaf(Op::Gate { input, window })
    }

    /// Total cursor advance: sum over sequential children, max over
    /// parallel ones, zero for an empty block.
    #[must_use]
    pub fn duration(&self) -> Mu {
        match self {
            Self::Leaf(op) => op.duration(),
            Self::Sequential(children) => children
                .iter()
                .map(Self::duration)
                .fold(0, Mu::saturating_add),
            Self::Parallel(children) => children.iter().map(Self::duration).fold(0, Mu::max),
        }
    }

    /// Start timestamps of every leaf when the block begins at `start`.
    #[must_use]
    pub fn plan(&self, start: Mu) -> Plan<'_> {
        let mut leaves = Vec::new();
        let duration = self.plan_into(start, &mut leaves);
        Plan { duration, leaves }
    }

    fn plan_into<'a>(&'a self, start: Mu, leaves: &mut Vec<PlannedLeaf<'a>>) -> Mu {
        match self {
            Self::Leaf(op) => {
                leaves.push(PlannedLeaf { start, op });
                op.duration()
            }
            Self::Sequential(children) => {
                let mut at = start;
                for child in children {
                    at = at.saturating_add(child.plan_into(at, leaves));
                }
                at.saturating_sub(start)
            }
            Self::Parallel(children) => children
                .iter()
                .map(|child| child.plan_into(start, leaves))
                .fold(0, Mu::max),
        }
    }

    /// Number of leaves.
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        match self {
            Self::Leaf(_) => 1,
            Self::Sequential(children) | Self::Parallel(children) => {
                children.iter().map(Self::leaf_count).sum()
            }
        }
    }
}
