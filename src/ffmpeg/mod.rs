pub mod command;
pub mod executor;

pub use command::{build_command, TranscodeCommand};
pub use executor::run_transcode;
