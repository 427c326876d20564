//! CLI command implementations

pub mod cache;
pub mod config;
pub mod run;
pub mod trace;

pub use cache::execute as cache;
pub use config::execute as config;
pub use run::execute as run;
pub use trace::execute as trace;
