pub mod args;
pub mod client;
pub mod config;
pub mod docker;
pub mod error;
pub mod harness;
pub mod launcher;
pub mod phases;
pub mod probe;
pub mod report;
pub mod runner;
pub mod secret;
pub mod state;

pub use config::Settings;
pub use error::HarnessError;
pub use report::RunReport;
