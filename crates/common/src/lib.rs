pub mod error;
pub mod ids;
pub mod types;

pub use error::{HogqError, Result};
pub use ids::*;
