mod interface;
mod parallel;
mod synchronous;

pub use interface::*;
pub use parallel::*;
pub use synchronous::*;
