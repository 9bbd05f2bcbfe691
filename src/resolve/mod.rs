//! Which handler applies to an instrumentation key

pub mod lazy_map;

pub use lazy_map::{LazyMap, Resolution};
