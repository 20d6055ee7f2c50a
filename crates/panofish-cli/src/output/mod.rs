pub mod analysis;
pub mod json;
pub mod writer;

pub use analysis::*;
pub use json::*;
pub use writer::*;
