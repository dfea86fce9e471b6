use smallvec::SmallVec;

use crate::ir::{Block, Relop, Type, Value};
use crate::Error;

/// One entry of the operand stack.
///
/// A comparison pushes its operands as a deferred triple instead of a
/// materialized 0/1 value, so that a directly following `br_if`, `if` or
/// `select` can emit a `CJump` straight from it. The triple is only turned
/// into an `i32` value if some later instruction needs one.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum OperandEntry {
    /// A materialized IR value.
    Value(Value),
    /// A comparison not yet coerced to a value.
    Compare { op: Relop, lhs: Value, rhs: Value },
}

/// The typed operand stack of one function lowering.
#[derive(Debug, Default)]
pub struct OperandStack {
    entries: Vec<OperandEntry>,
}

impl OperandStack {
    pub fn push(&mut self, entry: OperandEntry) {
        self.entries.push(entry);
    }

    pub fn push_value(&mut self, value: Value) {
        self.push(OperandEntry::Value(value));
    }

    pub fn pop(&mut self) -> Result<OperandEntry, Error> {
        self.entries.pop().ok_or(Error::StackUnderflow)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The kind of a structured control region.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum FrameKind {
    Block,
    Loop,
    If,
    Else,
}

/// The result phi of a structured region with a declared result type.
///
/// Every exit path through the region contributes one `(block, value)`
/// pair; the phi instruction itself is emitted when the region ends.
#[derive(Clone, Debug)]
pub struct ResultPhi {
    pub ty: Type,
    pub incoming: SmallVec<[(Block, Value); 2]>,
}

impl ResultPhi {
    pub fn new(ty: Type) -> Self {
        Self {
            ty,
            incoming: SmallVec::new(),
        }
    }
}

/// One active structured control region.
///
/// Branches into a `Loop` frame target `inner_block`; branches into any
/// other kind target `continue_block`.
#[derive(Clone, Debug)]
pub struct BlockFrame {
    pub kind: FrameKind,
    pub continue_block: Block,
    pub inner_block: Option<Block>,
    pub result: Option<ResultPhi>,
}

impl BlockFrame {
    /// The block a `br` into this frame jumps to.
    pub fn branch_target(&self) -> Block {
        match self.kind {
            FrameKind::Loop => self
                .inner_block
                .expect("loop frames are always created with an inner block; qed"),
            _ => self.continue_block,
        }
    }
}

/// The stack of active structured control regions.
///
/// `br depth` indexes this stack from the top, innermost frame at depth 0.
#[derive(Debug, Default)]
pub struct BlockStack {
    frames: Vec<BlockFrame>,
}

impl BlockStack {
    pub fn push(&mut self, frame: BlockFrame) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Result<BlockFrame, Error> {
        self.frames.pop().ok_or(Error::StackUnderflow)
    }

    /// The frame at the given branch depth.
    pub fn nth_from_top(&self, depth: u32) -> Result<&BlockFrame, Error> {
        let offset = depth as usize + 1;
        if self.frames.len() < offset {
            return Err(Error::StackUnderflow);
        }
        Ok(&self.frames[self.frames.len() - offset])
    }

    pub fn nth_from_top_mut(&mut self, depth: u32) -> Result<&mut BlockFrame, Error> {
        let offset = depth as usize + 1;
        if self.frames.len() < offset {
            return Err(Error::StackUnderflow);
        }
        let index = self.frames.len() - offset;
        Ok(&mut self.frames[index])
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn operand_stack_underflow_is_reported() {
        let mut stack = OperandStack::default();
        stack.push_value(Value(0));
        assert_matches!(stack.pop(), Ok(OperandEntry::Value(_)));
        assert_matches!(stack.pop(), Err(Error::StackUnderflow));
    }

    #[test]
    fn branch_depth_indexes_from_the_top() {
        let mut frames = BlockStack::default();
        frames.push(BlockFrame {
            kind: FrameKind::Block,
            continue_block: Block(1),
            inner_block: Some(Block(0)),
            result: None,
        });
        frames.push(BlockFrame {
            kind: FrameKind::Loop,
            continue_block: Block(3),
            inner_block: Some(Block(2)),
            result: None,
        });
        // Depth 0 is the innermost loop, branching to its inner block.
        assert_eq!(frames.nth_from_top(0).unwrap().branch_target(), Block(2));
        // Depth 1 is the outer block, branching to its continuation.
        assert_eq!(frames.nth_from_top(1).unwrap().branch_target(), Block(1));
        assert_matches!(frames.nth_from_top(2), Err(Error::StackUnderflow));
    }
}
