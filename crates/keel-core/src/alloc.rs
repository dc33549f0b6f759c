//! Recycling id allocator
//!
//! Hands out small integer ids (cluster ids, component ids, arena slots).
//! Uses a LIFO free stack so the lowest recently-released ids are reused
//! first, keeping Guids compact. An id is only ever returned to the pool by
//! an explicit `release`, which callers issue after full destruction.

use crate::error::{KeelError, KeelResult};

/// LIFO id allocator with a hard upper bound
#[derive(Debug, Clone)]
pub struct IdAllocator {
    /// Released ids, most recent last
    free_stack: Vec<u32>,

    /// Next never-used id
    next_fresh: u32,

    /// First id handed out by this allocator
    first: u32,

    /// Exclusive upper bound
    max_ids: u32,

    /// Ids currently handed out
    allocated: u32,
}

impl IdAllocator {
    /// Allocator over `first..max_ids`
    pub fn new(first: u32, max_ids: u32) -> Self {
        Self {
            free_stack: Vec::new(),
            next_fresh: first,
            first,
            max_ids,
            allocated: 0,
        }
    }

    /// Allocate an id, preferring recently released ones
    pub fn allocate(&mut self) -> KeelResult<u32> {
        if let Some(id) = self.free_stack.pop() {
            self.allocated += 1;
            return Ok(id);
        }
        if self.next_fresh >= self.max_ids {
            return Err(KeelError::IdsExhausted { limit: self.max_ids });
        }
        let id = self.next_fresh;
        self.next_fresh += 1;
        self.allocated += 1;
        Ok(id)
    }

    /// Return an id to the pool
    pub fn release(&mut self, id: u32) {
        debug_assert!(self.is_valid(id), "releasing foreign id {id}");
        debug_assert!(!self.free_stack.contains(&id), "double release of id {id}");
        self.free_stack.push(id);
        self.allocated = self.allocated.saturating_sub(1);
    }

    #[inline]
    pub fn allocated_count(&self) -> u32 {
        self.allocated
    }

    #[inline]
    pub fn max_ids(&self) -> u32 {
        self.max_ids
    }

    /// Number of never-used ids remaining
    #[inline]
    pub fn fresh_remaining(&self) -> u32 {
        self.max_ids.saturating_sub(self.next_fresh)
    }

    pub fn free_stack_size(&self) -> usize {
        self.free_stack.len()
    }

    #[inline]
    pub fn is_valid(&self, id: u32) -> bool {
        id >= self.first && id < self.next_fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_sequential() {
        let mut alloc = IdAllocator::new(0, 100);
        assert_eq!(alloc.allocate().unwrap(), 0);
        assert_eq!(alloc.allocate().unwrap(), 1);
        assert_eq!(alloc.allocate().unwrap(), 2);
        assert_eq!(alloc.allocated_count(), 3);
    }

    #[test]
    fn test_allocate_release_reuse() {
        let mut alloc = IdAllocator::new(1, 100);
        let id1 = alloc.allocate().unwrap();
        let _id2 = alloc.allocate().unwrap();

        alloc.release(id1);
        assert_eq!(alloc.allocated_count(), 1);

        // LIFO: the released id comes back first
        assert_eq!(alloc.allocate().unwrap(), id1);
    }

    #[test]
    fn test_allocate_exhaustion() {
        let mut alloc = IdAllocator::new(0, 2);
        alloc.allocate().unwrap();
        alloc.allocate().unwrap();
        assert!(matches!(alloc.allocate(), Err(KeelError::IdsExhausted { limit: 2 })));
    }

    #[test]
    fn test_first_offset() {
        let mut alloc = IdAllocator::new(1, 4);
        assert_eq!(alloc.allocate().unwrap(), 1);
        assert_eq!(alloc.fresh_remaining(), 2);
        assert!(!alloc.is_valid(0));
    }
}
