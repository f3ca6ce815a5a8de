mod materialize;
mod pool;

pub use materialize::*;
pub use pool::*;
