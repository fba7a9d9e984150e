//! B-Tree implementation
//!

// Re-export
pub use self::index::Index;
pub use self::index::IndexError;
pub use self::index::DEFAULT_DEGREE;
pub use self::iter::Iter;

pub mod index;
mod iter;
mod node;
