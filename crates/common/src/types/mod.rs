mod hog;
mod job;

pub use hog::*;
pub use job::*;
