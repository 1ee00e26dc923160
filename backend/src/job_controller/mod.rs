pub mod manager;
pub mod state;
pub mod status;
