//! First-fit range allocator over a single contiguous extent.
//!
//! A [`Freelist`] tracks which byte ranges of `[0, total_size)` are in use. It
//! knows nothing about devices; [`Buffer`](crate::buffer::Buffer) wraps one
//! around each sub-allocated device buffer.
//!
//! # Overview
//!
//! Nodes live in a dense arena (`Vec`) and are linked by index into an
//! offset-ordered doubly linked list. Released slots go on a free-index list
//! and are reused by later splits, so the arena never shrinks while in use.
//!
//! The list upholds three invariants after every operation:
//! 1. Nodes partition `[0, total_size)` with no gaps or overlaps.
//! 2. No two neighbouring nodes are both free.
//! 3. `free_space() + Σ allocated == total_size()`.
//!
//! When a freed node has free neighbours, the left node always survives the
//! merge and absorbs its right neighbour.
//!
//! # Example
//!
//! ```
//! use renderer_rhi::freelist::Freelist;
//!
//! let mut list = Freelist::new(1024);
//! let a = list.allocate_block(256).unwrap();
//! let b = list.allocate_block(128).unwrap();
//! assert_eq!((a.offset, b.offset), (0, 256));
//!
//! list.free_block(a.offset).unwrap();
//! assert_eq!(list.free_space(), 1024 - 128);
//! ```

use thiserror::Error;
use tracing::{debug, error, warn};

/// Errors reported by [`Freelist`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreelistError {
    /// No free range is large enough for the request.
    #[error("out of space: requested {requested} bytes, {free} bytes free (fragmented)")]
    OutOfSpace {
        /// Requested size in bytes.
        requested: u64,
        /// Total free bytes at the time of the request.
        free: u64,
    },

    /// No allocated block starts at the given offset.
    #[error("no allocated block at offset {offset}")]
    NotFound {
        /// The offset that was passed to `free_block`.
        offset: u64,
    },

    /// Zero-sized allocations are not tracked.
    #[error("cannot allocate a zero-sized block")]
    ZeroSize,

    /// `resize` was asked to keep or reduce the extent.
    #[error("cannot shrink freelist from {current} to {requested} bytes")]
    CannotShrink {
        /// Current total size.
        current: u64,
        /// Requested total size.
        requested: u64,
    },
}

/// A range handed out by [`Freelist::allocate_block`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Block {
    /// Byte offset of the range.
    pub offset: u64,
    /// Size of the range in bytes.
    pub size: u64,
}

impl Block {
    /// One past the last byte of the range.
    #[inline]
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// A node as reported by [`Freelist::blocks`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    /// Byte offset of the range.
    pub offset: u64,
    /// Size of the range in bytes.
    pub size: u64,
    /// Whether the range is available.
    pub is_free: bool,
}

#[derive(Clone, Copy, Debug)]
struct Node {
    offset: u64,
    size: u64,
    is_free: bool,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Offset/size free-space tracker with first-fit allocation and coalescing.
///
/// The allocator is not internally synchronized; mutation requires `&mut self`.
#[derive(Debug)]
pub struct Freelist {
    total_size: u64,
    nodes: Vec<Node>,
    free_slots: Vec<usize>,
    head: usize,
}

impl Freelist {
    /// Creates a freelist with a single free node spanning `[0, total_size)`.
    pub fn new(total_size: u64) -> Self {
        debug!("Created freelist of {} bytes", total_size);
        Self {
            total_size,
            nodes: vec![Self::whole(total_size)],
            free_slots: Vec::new(),
            head: 0,
        }
    }

    fn whole(total_size: u64) -> Node {
        Node {
            offset: 0,
            size: total_size,
            is_free: true,
            prev: None,
            next: None,
        }
    }

    /// Total extent managed by this list.
    #[inline]
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Number of live nodes (free and allocated).
    pub fn node_count(&self) -> usize {
        self.nodes.len() - self.free_slots.len()
    }

    /// Carves `size` bytes out of the first free range large enough to hold it.
    ///
    /// The allocated block is taken from the front of the free range, so the
    /// returned offset is the lowest offset of the first fitting range.
    ///
    /// # Errors
    ///
    /// - [`FreelistError::ZeroSize`] if `size` is zero
    /// - [`FreelistError::OutOfSpace`] if no free range can hold `size` bytes.
    ///   The list is left untouched and the caller may grow or give up.
    pub fn allocate_block(&mut self, size: u64) -> Result<Block, FreelistError> {
        if size == 0 {
            return Err(FreelistError::ZeroSize);
        }

        let mut cursor = Some(self.head);
        while let Some(index) = cursor {
            let node = self.nodes[index];

            if node.is_free && node.size >= size {
                if node.size == size {
                    self.nodes[index].is_free = false;
                } else {
                    let carved = self.insert_node(Node {
                        offset: node.offset,
                        size,
                        is_free: false,
                        prev: node.prev,
                        next: Some(index),
                    });

                    match node.prev {
                        Some(prev) => self.nodes[prev].next = Some(carved),
                        None => self.head = carved,
                    }

                    let remainder = &mut self.nodes[index];
                    remainder.prev = Some(carved);
                    remainder.offset += size;
                    remainder.size -= size;
                }

                return Ok(Block {
                    offset: node.offset,
                    size,
                });
            }

            cursor = node.next;
        }

        let free = self.free_space();
        warn!(
            "Freelist out of space: requested {} bytes, {} of {} bytes free",
            size, free, self.total_size
        );
        Err(FreelistError::OutOfSpace {
            requested: size,
            free,
        })
    }

    /// Releases the allocated block starting at `offset`, returning its size.
    ///
    /// The freed range is merged with free neighbours so that no two adjacent
    /// nodes are ever both free.
    ///
    /// # Errors
    ///
    /// Returns [`FreelistError::NotFound`] if no allocated block starts at
    /// `offset`. This indicates a caller bug (double free or a stale offset).
    pub fn free_block(&mut self, offset: u64) -> Result<u64, FreelistError> {
        let Some(index) = self.find_allocated(offset) else {
            error!("Attempted to free unknown block at offset {}", offset);
            return Err(FreelistError::NotFound { offset });
        };

        self.nodes[index].is_free = true;
        let size = self.nodes[index].size;

        let mut survivor = index;
        if let Some(prev) = self.nodes[index].prev
            && self.nodes[prev].is_free
        {
            self.merge_into_left(prev, index);
            survivor = prev;
        }

        if let Some(next) = self.nodes[survivor].next
            && self.nodes[next].is_free
        {
            self.merge_into_left(survivor, next);
        }

        Ok(size)
    }

    /// Drops every node and restores a single free node over the whole extent.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.free_slots.clear();
        self.nodes.push(Self::whole(self.total_size));
        self.head = 0;
    }

    /// Sum of the sizes of all free ranges.
    pub fn free_space(&self) -> u64 {
        self.blocks()
            .filter(|block| block.is_free)
            .map(|block| block.size)
            .sum()
    }

    /// Grows the managed extent to `new_total_size`.
    ///
    /// The new tail is free space. It extends the last node if that node is
    /// free, otherwise it becomes a new free node.
    ///
    /// # Errors
    ///
    /// Returns [`FreelistError::CannotShrink`] unless `new_total_size` is
    /// strictly greater than the current size.
    pub fn resize(&mut self, new_total_size: u64) -> Result<(), FreelistError> {
        if new_total_size <= self.total_size {
            return Err(FreelistError::CannotShrink {
                current: self.total_size,
                requested: new_total_size,
            });
        }

        let growth = new_total_size - self.total_size;
        let tail = self.tail();

        if self.nodes[tail].is_free {
            self.nodes[tail].size += growth;
        } else {
            let appended = self.insert_node(Node {
                offset: self.total_size,
                size: growth,
                is_free: true,
                prev: Some(tail),
                next: None,
            });
            self.nodes[tail].next = Some(appended);
        }

        debug!(
            "Freelist resized from {} to {} bytes",
            self.total_size, new_total_size
        );
        self.total_size = new_total_size;
        Ok(())
    }

    /// Iterates over every node in offset order.
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks {
            list: self,
            cursor: Some(self.head),
        }
    }

    fn find_allocated(&self, offset: u64) -> Option<usize> {
        let mut cursor = Some(self.head);
        while let Some(index) = cursor {
            let node = &self.nodes[index];
            if node.offset == offset && !node.is_free {
                return Some(index);
            }
            if node.offset > offset {
                return None;
            }
            cursor = node.next;
        }
        None
    }

    fn tail(&self) -> usize {
        let mut index = self.head;
        while let Some(next) = self.nodes[index].next {
            index = next;
        }
        index
    }

    fn insert_node(&mut self, node: Node) -> usize {
        match self.free_slots.pop() {
            Some(slot) => {
                self.nodes[slot] = node;
                slot
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    /// Folds `right` into `left`; `right` must directly follow `left`.
    fn merge_into_left(&mut self, left: usize, right: usize) {
        let absorbed = self.nodes[right];
        debug_assert_eq!(self.nodes[left].next, Some(right));

        let survivor = &mut self.nodes[left];
        survivor.size += absorbed.size;
        survivor.next = absorbed.next;

        if let Some(next) = absorbed.next {
            self.nodes[next].prev = Some(left);
        }
        self.free_slots.push(right);
    }
}

/// Iterator returned by [`Freelist::blocks`].
pub struct Blocks<'a> {
    list: &'a Freelist,
    cursor: Option<usize>,
}

impl Iterator for Blocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.cursor?;
        let node = &self.list.nodes[index];
        self.cursor = node.next;
        Some(BlockInfo {
            offset: node.offset,
            size: node.size,
            is_free: node.is_free,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Renders the list as `[offset+size:F|U ...]` for readable assertions.
    fn layout(list: &Freelist) -> String {
        list.blocks()
            .map(|b| format!("{}+{}:{}", b.offset, b.size, if b.is_free { 'F' } else { 'U' }))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn check_invariants(list: &Freelist, live: &[Block]) {
        let mut expected_offset = 0;
        let mut previous_free = false;
        for block in list.blocks() {
            assert_eq!(block.offset, expected_offset, "gap or overlap: {}", layout(list));
            assert!(
                !(previous_free && block.is_free),
                "adjacent free nodes: {}",
                layout(list)
            );
            expected_offset += block.size;
            previous_free = block.is_free;
        }
        assert_eq!(expected_offset, list.total_size());

        let allocated: u64 = live.iter().map(|b| b.size).sum();
        assert_eq!(list.free_space() + allocated, list.total_size());

        for (i, a) in live.iter().enumerate() {
            assert!(a.end() <= list.total_size());
            for b in &live[i + 1..] {
                assert!(a.end() <= b.offset || b.end() <= a.offset, "{a:?} overlaps {b:?}");
            }
        }
    }

    /// Small deterministic generator so sequences are reproducible.
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self) -> u64 {
            self.0 = self
                .0
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            self.0 >> 33
        }

        fn below(&mut self, bound: u64) -> u64 {
            self.next() % bound
        }
    }

    #[test]
    fn test_new_list_is_one_free_node() {
        let list = Freelist::new(512);
        assert_eq!(layout(&list), "0+512:F");
        assert_eq!(list.free_space(), 512);
        assert_eq!(list.node_count(), 1);
    }

    #[test]
    fn test_allocate_carves_from_front() {
        let mut list = Freelist::new(512);
        let a = list.allocate_block(100).unwrap();
        let b = list.allocate_block(12).unwrap();

        assert_eq!(a, Block { offset: 0, size: 100 });
        assert_eq!(b, Block { offset: 100, size: 12 });
        assert_eq!(layout(&list), "0+100:U 100+12:U 112+400:F");
    }

    #[test]
    fn test_exact_fit_does_not_split() {
        let mut list = Freelist::new(64);
        list.allocate_block(64).unwrap();
        assert_eq!(layout(&list), "0+64:U");
        assert_eq!(list.free_space(), 0);
    }

    #[test]
    fn test_out_of_space_leaves_list_untouched() {
        let mut list = Freelist::new(128);
        list.allocate_block(100).unwrap();
        let before = layout(&list);

        let err = list.allocate_block(64).unwrap_err();
        assert_eq!(
            err,
            FreelistError::OutOfSpace {
                requested: 64,
                free: 28
            }
        );
        assert_eq!(layout(&list), before);
    }

    #[test]
    fn test_zero_size_is_rejected() {
        let mut list = Freelist::new(128);
        assert_eq!(list.allocate_block(0), Err(FreelistError::ZeroSize));
    }

    #[test]
    fn test_free_unknown_offset_is_not_found() {
        let mut list = Freelist::new(128);
        let a = list.allocate_block(32).unwrap();

        assert_eq!(
            list.free_block(5),
            Err(FreelistError::NotFound { offset: 5 })
        );
        // The trailing free node starts at 32 but is not an allocation.
        assert_eq!(
            list.free_block(32),
            Err(FreelistError::NotFound { offset: 32 })
        );

        assert_eq!(list.free_block(a.offset), Ok(32));
        assert_eq!(
            list.free_block(a.offset),
            Err(FreelistError::NotFound { offset: 0 })
        );
    }

    #[test]
    fn test_free_merges_left_neighbour() {
        let mut list = Freelist::new(300);
        let a = list.allocate_block(100).unwrap();
        let b = list.allocate_block(100).unwrap();
        let _c = list.allocate_block(100).unwrap();

        list.free_block(a.offset).unwrap();
        list.free_block(b.offset).unwrap();
        assert_eq!(layout(&list), "0+200:F 200+100:U");
    }

    #[test]
    fn test_free_merges_right_neighbour() {
        let mut list = Freelist::new(300);
        let _a = list.allocate_block(100).unwrap();
        let b = list.allocate_block(100).unwrap();

        list.free_block(b.offset).unwrap();
        assert_eq!(layout(&list), "0+100:U 100+200:F");
    }

    #[test]
    fn test_free_merges_both_neighbours() {
        let mut list = Freelist::new(400);
        let a = list.allocate_block(100).unwrap();
        let b = list.allocate_block(100).unwrap();
        let c = list.allocate_block(100).unwrap();
        let _d = list.allocate_block(100).unwrap();

        list.free_block(a.offset).unwrap();
        list.free_block(c.offset).unwrap();
        assert_eq!(layout(&list), "0+100:F 100+100:U 200+100:F 300+100:U");

        list.free_block(b.offset).unwrap();
        assert_eq!(layout(&list), "0+300:F 300+100:U");
        check_invariants(&list, &[Block { offset: 300, size: 100 }]);
    }

    #[test]
    fn test_first_fit_takes_first_gap_not_largest() {
        let mut list = Freelist::new(1024);
        let a = list.allocate_block(100).unwrap();
        let _b = list.allocate_block(50).unwrap();
        let c = list.allocate_block(300).unwrap();
        let _d = list.allocate_block(50).unwrap();
        let e = list.allocate_block(50).unwrap();
        let _f = list.allocate_block(474).unwrap();
        assert_eq!(list.free_space(), 0);

        list.free_block(a.offset).unwrap();
        list.free_block(c.offset).unwrap();
        list.free_block(e.offset).unwrap();
        assert_eq!(
            layout(&list),
            "0+100:F 100+50:U 150+300:F 450+50:U 500+50:F 550+474:U"
        );

        let fit = list.allocate_block(80).unwrap();
        assert_eq!(fit.offset, 0);

        let fit = list.allocate_block(200).unwrap();
        assert_eq!(fit.offset, 150);

        let fit = list.allocate_block(50).unwrap();
        assert_eq!(fit.offset, 350);
    }

    #[test]
    fn test_clear_restores_single_node() {
        let mut list = Freelist::new(256);
        for _ in 0..4 {
            list.allocate_block(16).unwrap();
        }
        list.clear();
        assert_eq!(layout(&list), "0+256:F");
        assert_eq!(list.node_count(), 1);
        assert_eq!(list.allocate_block(256).unwrap().offset, 0);
    }

    #[test]
    fn test_resize_extends_trailing_free_node() {
        let mut list = Freelist::new(100);
        list.allocate_block(40).unwrap();
        list.resize(200).unwrap();
        assert_eq!(layout(&list), "0+40:U 40+160:F");
    }

    #[test]
    fn test_resize_appends_after_allocated_tail() {
        let mut list = Freelist::new(100);
        list.allocate_block(100).unwrap();
        list.resize(150).unwrap();
        assert_eq!(layout(&list), "0+100:U 100+50:F");
        assert_eq!(list.allocate_block(50).unwrap().offset, 100);
    }

    #[test]
    fn test_resize_rejects_shrink() {
        let mut list = Freelist::new(100);
        assert_eq!(
            list.resize(100),
            Err(FreelistError::CannotShrink {
                current: 100,
                requested: 100
            })
        );
    }

    #[test]
    fn test_arena_slots_are_reused() {
        let mut list = Freelist::new(1024);
        for _ in 0..50 {
            let a = list.allocate_block(10).unwrap();
            let b = list.allocate_block(10).unwrap();
            list.free_block(a.offset).unwrap();
            list.free_block(b.offset).unwrap();
        }
        assert_eq!(list.node_count(), 1);
        assert!(list.nodes.len() <= 3);
    }

    #[test]
    fn test_random_sequence_conserves_space() {
        const TOTAL: u64 = 1024;
        let mut list = Freelist::new(TOTAL);
        let mut live: Vec<Block> = Vec::new();
        let mut rng = Lcg(0x5eed);

        for _ in 0..2000 {
            if live.is_empty() || rng.below(3) != 0 {
                let size = 1 + rng.below(64);
                match list.allocate_block(size) {
                    Ok(block) => live.push(block),
                    Err(FreelistError::OutOfSpace { .. }) => {}
                    Err(e) => panic!("unexpected error: {e}"),
                }
            } else {
                let victim = live.swap_remove(rng.below(live.len() as u64) as usize);
                assert_eq!(list.free_block(victim.offset), Ok(victim.size));
            }
            check_invariants(&list, &live);
        }
    }

    #[test]
    fn test_freeing_everything_in_any_order_reclaims_all() {
        const TOTAL: u64 = 4096;
        for seed in 1..=8 {
            let mut list = Freelist::new(TOTAL);
            let mut rng = Lcg(seed);
            let mut live = Vec::new();

            while let Ok(block) = list.allocate_block(1 + rng.below(200)) {
                live.push(block);
            }

            while !live.is_empty() {
                let victim = live.swap_remove(rng.below(live.len() as u64) as usize);
                list.free_block(victim.offset).unwrap();
                check_invariants(&list, &live);
            }

            assert_eq!(layout(&list), format!("0+{TOTAL}:F"), "seed {seed}");
            assert_eq!(list.node_count(), 1);
        }
    }
}
