pub mod policy;
pub mod registry;
pub mod state_buffer;
