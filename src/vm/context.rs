//! Per-encode scratch state, pooled per thread.

use std::cell::RefCell;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};

use log::trace;

use super::opcode::Program;

/// Contexts kept per thread.
const POOL_CAP: usize = 8;
/// Buffers above this capacity are dropped instead of pooled.
const RETAIN_LIMIT: usize = 1 << 20;

pub(crate) struct Frame {
    pub program: &'static Program,
    pub ret: usize,
    pub base: usize,
    pub indent: usize,
}

#[derive(Clone, Copy, Default)]
pub(crate) struct MapPos {
    pub start: usize,
    pub key_start: usize,
    pub key_end: usize,
    pub end: usize,
}

/// One map being iterated.
#[derive(Default)]
pub(crate) struct MapContext {
    pub entries: Vec<(*const u8, *const u8)>,
    pub idx: usize,
    pub positions: Vec<MapPos>,
    pub ordered: bool,
    pub scratch: Vec<u8>,
}

impl MapContext {
    pub fn clear(&mut self) {
        self.entries.clear();
        self.idx = 0;
        self.positions.clear();
        self.scratch.clear();
    }

    /// Reorders the entries written into `b[start..]` by encoded key.
    pub fn sort_into(&mut self, b: &mut Vec<u8>, trim_front: usize, trim_back: usize) {
        let region_start = match self.positions.first() {
            Some(p) => p.start,
            None => return,
        };
        {
            let buf: &[u8] = &b[..];
            self.positions
                .sort_by(|x, y| buf[x.key_start + trim_front..x.key_end - trim_back].cmp(&buf[y.key_start + trim_front..y.key_end - trim_back]));
        }
        self.scratch.clear();
        for p in &self.positions {
            self.scratch.extend_from_slice(&b[p.start..p.end]);
        }
        b.truncate(region_start);
        b.extend_from_slice(&self.scratch);
    }
}

pub(crate) struct RuntimeContext {
    pub buf: Vec<u8>,
    pub ptrs: Vec<usize>,
    pub seen: Vec<usize>,
    pub frames: Vec<Frame>,
    pub maps: Vec<MapContext>,
    pub map_pool: Vec<MapContext>,
    pub scratch: Vec<u8>,
}

impl RuntimeContext {
    fn new() -> RuntimeContext {
        RuntimeContext {
            buf: Vec::with_capacity(1024),
            ptrs: Vec::new(),
            seen: Vec::new(),
            frames: Vec::new(),
            maps: Vec::new(),
            map_pool: Vec::new(),
            scratch: Vec::new(),
        }
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.ptrs.clear();
        self.seen.clear();
        self.frames.clear();
        while let Some(mut m) = self.maps.pop() {
            m.clear();
            self.map_pool.push(m);
        }
        self.scratch.clear();
    }

    fn retainable(&self) -> bool {
        self.buf.capacity() <= RETAIN_LIMIT && self.scratch.capacity() <= RETAIN_LIMIT
    }
}

thread_local! {
    static POOL: RefCell<Vec<Box<RuntimeContext>>> = const { RefCell::new(Vec::new()) };
}

/// A context borrowed from the thread pool, returned on drop.
pub(crate) struct PooledContext(ManuallyDrop<Box<RuntimeContext>>);

impl PooledContext {
    pub fn acquire() -> PooledContext {
        let ctx = POOL
            .try_with(|pool| pool.borrow_mut().pop())
            .ok()
            .flatten()
            .unwrap_or_else(|| {
                trace!("allocating runtime context");
                Box::new(RuntimeContext::new())
            });
        PooledContext(ManuallyDrop::new(ctx))
    }
}

impl Deref for PooledContext {
    type Target = RuntimeContext;

    fn deref(&self) -> &RuntimeContext {
        &self.0
    }
}

impl DerefMut for PooledContext {
    fn deref_mut(&mut self) -> &mut RuntimeContext {
        &mut self.0
    }
}

impl Drop for PooledContext {
    fn drop(&mut self) {
        // SAFETY: the field is never touched again after this.
        let mut ctx = unsafe { ManuallyDrop::take(&mut self.0) };
        if !ctx.retainable() {
            trace!("dropping oversized runtime context ({} bytes)", ctx.buf.capacity());
            return;
        }
        ctx.reset();
        let _ = POOL.try_with(|pool| {
            let mut pool = pool.borrow_mut();
            if pool.len() < POOL_CAP {
                pool.push(ctx);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contexts_are_reused_and_cleared() {
        let first_ptr = {
            let mut ctx = PooledContext::acquire();
            ctx.buf.extend_from_slice(b"abc");
            ctx.ptrs.push(1);
            &*ctx as *const RuntimeContext
        };
        let ctx = PooledContext::acquire();
        assert_eq!(&*ctx as *const RuntimeContext, first_ptr);
        assert!(ctx.buf.is_empty());
        assert!(ctx.ptrs.is_empty());
    }

    #[test]
    fn oversized_buffers_are_not_pooled() {
        {
            let mut ctx = PooledContext::acquire();
            ctx.buf.reserve(RETAIN_LIMIT * 2);
        }
        let ctx = PooledContext::acquire();
        assert!(ctx.buf.capacity() <= RETAIN_LIMIT);
    }

    #[test]
    fn sort_reorders_entries_by_key() {
        // {"b":1,"a":2,
        let mut b = b"{\"b\":1,\"a\":2,".to_vec();
        let mut m = MapContext::default();
        m.positions.push(MapPos { start: 1, key_start: 1, key_end: 4, end: 7 });
        m.positions.push(MapPos { start: 7, key_start: 7, key_end: 10, end: 13 });
        m.sort_into(&mut b, 1, 1);
        assert_eq!(b, b"{\"a\":2,\"b\":1,");
    }
}
