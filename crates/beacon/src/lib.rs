pub mod api;
pub mod session_store;
pub mod transport;
pub mod tui;
