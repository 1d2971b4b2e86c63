//! Import discovery for JavaScript/TypeScript files.
//!
//! Provides a simple scanner to detect import/require specifiers.

mod scan;

pub use scan::{has_top_level_await, scan_imports, ImportKind, ImportSpecCore};
