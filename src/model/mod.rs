mod method;
mod types;

pub use method::*;
pub use types::*;
