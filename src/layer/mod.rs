//! State layering
//!
//! Overlays filesystem states onto a base, either through diff/merge ops or
//! with whole-tree copies.

pub mod compose;

pub use compose::{ComposeStrategy, Composer};
