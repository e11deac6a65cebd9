//! artiflow-lib: idempotent, integrity-verified artifact transformation
//!
//! A run takes a source artifact through staging, an optional customize and
//! convert step, and publication into an output directory:
//! - `record`: content-hash records stored next to artifacts
//! - `staging`: working copies in an ephemeral or caller-owned directory
//! - `oracle`: decides whether a published output can be reused
//! - `transform`: runs the external customize and convert commands
//! - `publish`: places the result and its records in the output directory
//! - `pipeline`: drives a run through its states
//!
//! Every artifact boundary is checked by hash, so a reused output is always
//! one whose bytes and provenance have been verified.

pub mod artifact;
pub mod cleanup;
pub mod config;
pub mod consts;
pub mod error;
pub mod lock;
pub mod oracle;
pub mod pipeline;
pub mod publish;
pub mod record;
pub mod staging;
pub mod transform;
pub mod util;

pub use error::{ErrorKind, PipelineError};
pub use pipeline::{Pipeline, RunOptions, RunOutcome, RunState};
