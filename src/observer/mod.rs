// Observer system: hooks that run ring by ring before each statement

pub mod context;
pub mod error;
pub mod implementations;
pub mod pipeline;
pub mod traits;

pub use context::*;
pub use error::*;
pub use implementations::*;
pub use pipeline::*;
pub use traits::*;
