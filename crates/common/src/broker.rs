mod link;
mod message;
mod traits;

pub use link::*;
pub use message::*;
pub use traits::*;
