//! Command implementations for the Dirigent CLI.

mod doctor;
mod init;
mod jobs;
mod serve;

pub use doctor::run_doctor;
pub use init::run_init;
pub use jobs::run_jobs;
pub use serve::run_serve;
