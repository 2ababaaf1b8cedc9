//! Core data types shared by the engine and providers.

pub mod generation;
pub mod message;
pub mod model;
pub mod usage;

pub use generation::*;
pub use message::*;
pub use model::*;
pub use usage::*;
