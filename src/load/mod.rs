//! Loaders de referência

pub mod common;
pub mod console;
pub mod json;
pub mod memory;
