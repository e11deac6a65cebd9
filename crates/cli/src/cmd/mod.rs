mod hash;
mod run;
mod status;
mod verify;

pub use hash::cmd_hash;
pub use run::{RunArgs, cmd_run};
pub use status::cmd_status;
pub use verify::cmd_verify;
