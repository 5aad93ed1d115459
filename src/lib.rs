//! Cross-backend pipeline state and binding.
//!
//! A [`gpu::Context`] owns one backend. Graphics pipelines are split into
//! shared state fragments so that switching between related pipelines only
//! touches the state that actually differs, and every native setter goes
//! through a render-state tracker that drops redundant calls.

pub mod gpu;
pub mod utils;

pub use gpu::*;
pub use utils::Handle;
