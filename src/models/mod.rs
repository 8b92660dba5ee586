pub mod endpoint;
pub mod session;

pub use endpoint::*;
pub use session::*;
