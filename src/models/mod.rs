pub mod proxy;
pub mod result;

pub use proxy::*;
pub use result::*;
