pub mod config;
pub mod confirm;
pub mod credentials;
pub mod error;
pub mod form;
pub mod pagination;
pub mod params;
pub mod paths;
pub mod tasks;
