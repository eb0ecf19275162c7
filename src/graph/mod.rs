//! 叙事图与路径解析

pub mod narrative;
pub mod path;

pub use narrative::NarrativeGraph;
pub use path::{enumerate_branches, local_branches, path_to};
