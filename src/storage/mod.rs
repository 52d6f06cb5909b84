pub mod db;
pub mod models;

pub use db::{ConfigurationStore, Database};
pub use models::{Configuration, DatabaseStats, SweepRun};
