mod build;
mod gc;
mod info;
mod ls;
mod plan;

pub use build::{BuildArgs, cmd_build};
pub use gc::{GcArgs, cmd_gc};
pub use info::cmd_info;
pub use ls::cmd_ls;
pub use plan::cmd_plan;
