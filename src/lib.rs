//! Dynamic multi-string BWT over graph node ids, with batched insertion,
//! merging, LF navigation, and a stable on-disk format.

pub mod bytecode;
pub mod dynamic;
pub mod headers;
pub mod record;
pub mod support;

pub use dynamic::DynamicGBWT;
pub use support::{Pos, Run, ENDMARKER};
