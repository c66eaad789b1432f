//! Local implementations: scaffold on the filesystem, run the packaging tools as
//! subprocesses, and orchestrate the stages inside a throwaway working directory.

pub mod pipeline;
pub mod scaffold;
pub mod shellout;
pub mod stages;
pub mod toolchain;

#[cfg(test)]
pub(crate) mod testing;

pub use pipeline::Pipeline;
pub use shellout::SystemRunner;
pub use toolchain::{PipelineConfig, Toolchain};
