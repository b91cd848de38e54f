#![forbid(unsafe_code)]

//! Ready-made plugins.

pub mod redo;

pub use redo::RedoStack;
