pub mod cli;
pub mod config;
pub mod error;
pub mod model;
pub mod output;
pub mod registry;
pub mod state;
pub mod sysctl;
pub mod table;
