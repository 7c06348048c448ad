//! Linear (bump) arena over a fixed-size block.
//!
//! The arena hands out byte ranges, not memory. Callers use the ranges as
//! offsets into a buffer they own, which lets one GPU allocation back many
//! small sub-allocations (per-frame uniform blocks, for example). Ranges are
//! never freed individually; `reset` releases everything at once.

use crate::error::{Error, Result};

/// Round `value` up to the next multiple of `align`.
///
/// `align` must be a power of two; zero is treated as one.
#[must_use]
pub const fn align_up(value: u64, align: u64) -> u64 {
    let align = if align == 0 { 1 } else { align };
    (value + align - 1) & !(align - 1)
}

/// A byte range handed out by [`LinearArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaRange {
    /// Offset from the start of the block.
    pub offset: u64,
    /// Size in bytes.
    pub size: u64,
}

impl ArenaRange {
    /// One past the last byte of the range.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Bump allocator over `capacity` bytes.
#[derive(Debug, Clone)]
pub struct LinearArena {
    capacity: u64,
    cursor: u64,
    high_water: u64,
}

impl LinearArena {
    /// Create an empty arena over `capacity` bytes.
    #[must_use]
    pub const fn new(capacity: u64) -> Self {
        Self {
            capacity,
            cursor: 0,
            high_water: 0,
        }
    }

    /// Reserve `size` bytes aligned to `align`.
    pub fn alloc(&mut self, size: u64, align: u64) -> Result<ArenaRange> {
        if align != 0 && !align.is_power_of_two() {
            return Err(Error::InvalidData(format!(
                "alignment {align} is not a power of two"
            )));
        }

        let offset = align_up(self.cursor, align);
        let end = offset
            .checked_add(size)
            .ok_or_else(|| Error::OutOfBounds("arena offset overflow".to_string()))?;
        if end > self.capacity {
            return Err(Error::OutOfBounds(format!(
                "arena exhausted: need {size} bytes at offset {offset}, capacity {}",
                self.capacity
            )));
        }

        self.cursor = end;
        self.high_water = self.high_water.max(end);
        Ok(ArenaRange { offset, size })
    }

    /// Release every range handed out so far.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// Total bytes managed by the arena.
    #[must_use]
    pub const fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Bytes consumed since the last reset, including alignment padding.
    #[must_use]
    pub const fn used(&self) -> u64 {
        self.cursor
    }

    /// Bytes still available (ignoring future alignment padding).
    #[must_use]
    pub const fn remaining(&self) -> u64 {
        self.capacity - self.cursor
    }

    /// Largest `used()` value ever observed.
    #[must_use]
    pub const fn high_water(&self) -> u64 {
        self.high_water
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_power_of_two() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 64), 320);
        assert_eq!(align_up(13, 0), 13);
    }

    #[test]
    fn allocations_respect_alignment() {
        let mut arena = LinearArena::new(1024);
        let a = arena.alloc(100, 256).unwrap();
        let b = arena.alloc(100, 256).unwrap();

        assert_eq!(a, ArenaRange { offset: 0, size: 100 });
        assert_eq!(b.offset, 256);
        assert_eq!(arena.used(), 356);
        assert!(a.end() <= b.offset);
    }

    #[test]
    fn exhaustion_is_an_error() {
        let mut arena = LinearArena::new(512);
        arena.alloc(256, 256).unwrap();
        arena.alloc(256, 256).unwrap();
        assert!(matches!(arena.alloc(1, 1), Err(Error::OutOfBounds(_))));
    }

    #[test]
    fn rejects_non_power_of_two_alignment() {
        let mut arena = LinearArena::new(512);
        assert!(matches!(arena.alloc(4, 3), Err(Error::InvalidData(_))));
    }

    #[test]
    fn reset_reclaims_space_but_keeps_high_water() {
        let mut arena = LinearArena::new(128);
        arena.alloc(96, 16).unwrap();
        arena.reset();

        assert_eq!(arena.used(), 0);
        assert_eq!(arena.remaining(), 128);
        assert_eq!(arena.high_water(), 96);
        assert_eq!(arena.alloc(128, 16).unwrap().offset, 0);
    }
}
