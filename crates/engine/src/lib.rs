pub mod clip;
pub mod compiler;
pub mod gloss;
pub mod job;
pub mod ranking;
pub mod render;
pub mod segment;
pub mod timeline;

pub use clip::*;
pub use compiler::*;
pub use gloss::{parse_gloss_line, GlossToken};
pub use job::*;
pub use segment::*;
pub use timeline::*;
