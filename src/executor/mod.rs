pub mod run;

pub use run::{run_with_timeout, RunStatus};
