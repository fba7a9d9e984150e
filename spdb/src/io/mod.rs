//! Segment file I/O
//!

// Re-export
pub use self::pool::BufferPool;
pub use self::segment::discover_segments;
pub use self::segment::SegmentName;
pub use self::segment::SegmentReader;
pub use self::segment::SegmentWriter;

pub mod pool;
pub mod segment;
