mod call_result;
mod engine;
mod interface;
#[cfg(test)]
mod tests;

pub use call_result::*;
pub use engine::*;
pub use interface::*;
