use std::rc::Rc;

use crate::asset::Handle;
use crate::renderer::device::{Effect, RenderDevice};
use crate::renderer::global_state::{ApplyMode, ChainIndex, GlobalStateBlock};

const INITIAL_LOG_SIZE: usize = 256;

/// Where the currently pushed blocks sit in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChainState {
    /// Nothing pushed.
    Empty,
    /// `len` pushed blocks at the tail of the log, unterminated.
    Open { len: usize },
    /// The open chain was captured: `len` blocks followed by a terminator.
    /// The next push or pop copies the chain before modifying it so the
    /// captured index stays valid.
    Captured { len: usize },
}

/// Frame log of pushed global state blocks.
///
/// Captured chains are immutable runs in the log terminated by `None`. Queued
/// render ops keep a [`ChainIndex`] into the log instead of copies of the
/// blocks; capturing the same open chain twice yields the same index.
#[derive(Debug)]
pub(crate) struct GlobalStateRecorder {
    log: Vec<Option<Rc<dyn GlobalStateBlock>>>,
    state: ChainState,
}

impl GlobalStateRecorder {
    pub(crate) fn new() -> Self {
        Self {
            log: Vec::with_capacity(INITIAL_LOG_SIZE),
            state: ChainState::Empty,
        }
    }

    /// Number of pushed blocks currently in effect.
    pub(crate) fn depth(&self) -> usize {
        match self.state {
            ChainState::Empty => 0,
            ChainState::Open { len } | ChainState::Captured { len } => len,
        }
    }

    pub(crate) fn log_len(&self) -> usize {
        self.log.len()
    }

    fn chain_start(&self) -> usize {
        match self.state {
            ChainState::Empty => self.log.len(),
            ChainState::Open { len } => self.log.len() - len,
            ChainState::Captured { len } => self.log.len() - len - 1,
        }
    }

    fn top(&self) -> Option<&Rc<dyn GlobalStateBlock>> {
        let len = self.depth();
        if len == 0 {
            return None;
        }
        self.log[self.chain_start() + len - 1].as_ref()
    }

    /// Returns the index of the chain currently pushed, or `None` when no
    /// block is pushed.
    pub(crate) fn capture(&mut self) -> Option<ChainIndex> {
        match self.state {
            ChainState::Empty => None,
            ChainState::Open { len } => {
                self.log.push(None);
                self.state = ChainState::Captured { len };
                Some(ChainIndex(self.chain_start() as u32))
            }
            ChainState::Captured { .. } => Some(ChainIndex(self.chain_start() as u32)),
        }
    }

    pub(crate) fn push(&mut self, block: Rc<dyn GlobalStateBlock>) {
        let repeated = self
            .top()
            .is_some_and(|top| std::ptr::addr_eq(Rc::as_ptr(top), Rc::as_ptr(&block)));
        debug_assert!(
            !repeated,
            "the same global state block was pushed twice in a row"
        );
        if repeated {
            log::warn!("Global state block {:?} pushed twice in a row", block);
        }

        let len = self.depth();
        if let ChainState::Captured { .. } = self.state {
            self.reopen(len);
        }
        self.log.push(Some(block));
        self.state = ChainState::Open { len: len + 1 };
    }

    pub(crate) fn pop(&mut self, block: &Rc<dyn GlobalStateBlock>) {
        let matches_top = self
            .top()
            .is_some_and(|top| std::ptr::addr_eq(Rc::as_ptr(top), Rc::as_ptr(block)));
        debug_assert!(matches_top, "popped global state block is not on top");
        if !matches_top {
            log::warn!("Popping global state block {:?} which is not on top", block);
        }

        match self.state {
            ChainState::Empty => {}
            ChainState::Open { len } => {
                self.log.pop();
                self.state = Self::open(len - 1);
            }
            ChainState::Captured { len } => {
                // copy only the blocks that survive the pop
                self.reopen(len - 1);
                self.state = Self::open(len - 1);
            }
        }
    }

    fn open(len: usize) -> ChainState {
        if len == 0 {
            ChainState::Empty
        } else {
            ChainState::Open { len }
        }
    }

    /// Copies the first `len` blocks of the captured chain to the tail.
    fn reopen(&mut self, len: usize) {
        let start = self.chain_start();
        for i in 0..len {
            let block = self.log[start + i].clone();
            self.log.push(block);
        }
    }

    fn chain(&self, index: ChainIndex) -> &[Option<Rc<dyn GlobalStateBlock>>] {
        let start = index.0 as usize;
        let tail = self.log.get(start..).unwrap_or_default();
        let end = tail.iter().position(Option::is_none).unwrap_or(tail.len());
        &tail[..end]
    }

    /// Replays the chain at `index`. Undo walks the chain in reverse.
    pub(crate) fn apply(
        &self,
        index: Option<ChainIndex>,
        mode: ApplyMode,
        effect: Handle<Effect>,
        device: &mut dyn RenderDevice,
    ) {
        let Some(index) = index else {
            return;
        };
        let chain = self.chain(index);
        debug_assert!(!chain.is_empty(), "chain index {:?} is empty", index);

        let blocks = chain.iter().flatten();
        if mode == ApplyMode::Undo {
            for block in blocks.rev() {
                block.apply(device, effect, mode);
            }
        } else {
            for block in blocks {
                block.apply(device, effect, mode);
            }
        }
    }

    /// Drops every captured chain. Blocks still pushed stay in effect and
    /// are moved to the front of the emptied log.
    pub(crate) fn reset(&mut self) {
        let len = self.depth();
        if len == 0 {
            self.log.clear();
            self.state = ChainState::Empty;
            return;
        }

        let start = self.chain_start();
        let open: Vec<_> = self.log.drain(start..start + len).collect();
        self.log.clear();
        self.log.extend(open);
        self.state = ChainState::Open { len };
    }
}
