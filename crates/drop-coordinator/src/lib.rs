pub mod api;
pub mod config;
pub mod domain;
pub mod infra;
pub mod startup;

pub use config::*;
pub use domain::Error as DropError;
pub use startup::*;
