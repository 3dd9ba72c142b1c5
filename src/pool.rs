//! Fixed size block pools
//!
//! The host never allocates more connections, channels, or procedures than what it was configured
//! for. A `Pool` only does the accounting, the objects themselves are ordinary owned values that
//! carry the [`Block`] they were allocated with. Returning the block to its pool is the only way
//! to give the capacity back.

/// A fixed size pool
#[derive(Debug)]
pub struct Pool {
    name: &'static str,
    capacity: usize,
    free: usize,
}

/// A block allocated from a [`Pool`]
///
/// A block is not `Clone`, so it can only be returned to its pool once.
#[derive(Debug, PartialEq, Eq)]
pub struct Block {
    pool: &'static str,
}

impl Pool {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Pool {
            name,
            capacity,
            free: capacity,
        }
    }

    /// Allocate a block
    ///
    /// `None` is returned when the pool is exhausted.
    pub fn alloc(&mut self) -> Option<Block> {
        if self.free == 0 {
            log::trace!("pool '{}' is exhausted", self.name);

            None
        } else {
            self.free -= 1;

            Some(Block { pool: self.name })
        }
    }

    /// Return a block to the pool
    pub fn free(&mut self, block: Block) {
        debug_assert_eq!(
            self.name, block.pool,
            "block of pool '{}' returned to pool '{}'",
            block.pool, self.name
        );

        debug_assert!(self.free < self.capacity, "pool '{}' overfreed", self.name);

        self.free = core::cmp::min(self.free + 1, self.capacity);
    }

    /// Get the number of free blocks
    pub fn num_free(&self) -> usize {
        self.free
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Check that `count` blocks can be allocated
    pub fn can_alloc(&self, count: usize) -> bool {
        self.free >= count
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn alloc_until_exhausted() {
        let mut pool = Pool::new("test", 2);

        let first = pool.alloc().unwrap();
        let second = pool.alloc().unwrap();

        assert!(pool.alloc().is_none());
        assert!(!pool.can_alloc(1));

        pool.free(first);

        assert_eq!(1, pool.num_free());

        pool.free(second);

        assert_eq!(2, pool.num_free());
        assert!(pool.can_alloc(2));
    }

    #[test]
    #[should_panic]
    fn wrong_pool() {
        let mut a = Pool::new("a", 1);
        let mut b = Pool::new("b", 1);

        let block = a.alloc().unwrap();

        b.alloc().unwrap();

        b.free(block);
    }
}
