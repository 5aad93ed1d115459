pub mod state;
pub mod types;
