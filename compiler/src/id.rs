// id.rs — Buffer indices and stable state identifiers
//
// Buffers are virtual registers in the VM's fixed pool, issued monotonically
// per compile. State IDs are FNV-1a hashes of a `/`-joined lexical path so
// that the VM can match persistent state (oscillator phase, envelope stage,
// sequencer position) to the same instruction across live recompiles.

use std::fmt;

/// Capacity of the VM buffer pool.
pub const MAX_BUFFERS: u16 = 256;

/// A virtual register in the VM buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct BufferIndex(pub u16);

impl BufferIndex {
    /// "No value": unused instruction inputs and nodes without a runtime value.
    pub const UNUSED: BufferIndex = BufferIndex(0xFFFF);

    pub fn is_unused(self) -> bool {
        self == Self::UNUSED
    }
}

impl fmt::Display for BufferIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unused() {
            write!(f, "_")
        } else {
            write!(f, "b{}", self.0)
        }
    }
}

/// Monotonic buffer allocator over a fixed pool.
#[derive(Debug)]
pub struct BufferAllocator {
    next: u16,
    capacity: u16,
}

impl Default for BufferAllocator {
    fn default() -> Self {
        Self::with_capacity(MAX_BUFFERS)
    }
}

impl BufferAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: u16) -> Self {
        Self {
            next: 0,
            capacity: capacity.min(MAX_BUFFERS),
        }
    }

    /// Next free index, or `None` once the pool is exhausted.
    pub fn allocate(&mut self) -> Option<BufferIndex> {
        if self.next >= self.capacity {
            return None;
        }
        let idx = BufferIndex(self.next);
        self.next += 1;
        Some(idx)
    }

    /// Number of buffers handed out so far.
    pub fn count(&self) -> u16 {
        self.next
    }
}

// ── State identity ──

const FNV_OFFSET: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;

/// 32-bit FNV-1a.
pub fn fnv1a(s: &str) -> u32 {
    s.bytes()
        .fold(FNV_OFFSET, |h, b| (h ^ u32::from(b)).wrapping_mul(FNV_PRIME))
}

/// Stack of path segments identifying the current lexical position.
#[derive(Debug, Clone)]
pub struct StatePath {
    segments: Vec<String>,
}

impl Default for StatePath {
    fn default() -> Self {
        Self {
            segments: vec!["main".to_string()],
        }
    }
}

impl StatePath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, segment: impl Into<String>) {
        self.segments.push(segment.into());
    }

    /// Pop the innermost segment. The root segment is never removed.
    pub fn pop(&mut self) {
        if self.segments.len() > 1 {
            self.segments.pop();
        }
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn joined(&self) -> String {
        self.segments.join("/")
    }

    /// State ID of the current position.
    pub fn compute_id(&self) -> u32 {
        fnv1a(&self.joined())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocator_is_monotonic() {
        let mut alloc = BufferAllocator::new();
        let a = alloc.allocate().unwrap();
        let b = alloc.allocate().unwrap();
        assert_eq!(a, BufferIndex(0));
        assert_eq!(b, BufferIndex(1));
        assert_eq!(alloc.count(), 2);
    }

    #[test]
    fn allocator_exhausts_at_capacity() {
        let mut alloc = BufferAllocator::new();
        for i in 0..MAX_BUFFERS {
            assert_eq!(alloc.allocate(), Some(BufferIndex(i)));
        }
        assert_eq!(alloc.allocate(), None);
        assert_eq!(alloc.count(), MAX_BUFFERS);
    }

    #[test]
    fn fnv1a_reference_values() {
        assert_eq!(fnv1a(""), 2_166_136_261);
        assert_eq!(fnv1a("a"), 0xe40c_292c);
        assert_eq!(fnv1a("foobar"), 0xbf9c_f968);
    }

    #[test]
    fn path_joins_from_main() {
        let mut path = StatePath::new();
        path.push("lead");
        path.push("sin#0");
        assert_eq!(path.joined(), "main/lead/sin#0");
        assert_eq!(path.compute_id(), fnv1a("main/lead/sin#0"));
        path.pop();
        path.pop();
        path.pop();
        assert_eq!(path.joined(), "main");
        assert_eq!(path.depth(), 1);
    }

    #[test]
    fn unused_display() {
        assert_eq!(BufferIndex::UNUSED.to_string(), "_");
        assert_eq!(BufferIndex(7).to_string(), "b7");
    }
}
