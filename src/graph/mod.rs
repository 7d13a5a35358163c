//! Build-graph model
//!
//! States, the ops that produce them, and the option types used to describe
//! a step before it is committed.

mod constraints;
mod definition;
mod exec;
mod file;
mod platform;
#[cfg(test)]
pub(crate) mod snapshot;
mod state;

pub use constraints::{
    custom_name, description, ignore_cache, platform, progress_group, with_constraint, with_constraints,
    Constraints, ConstraintsOpt, ProgressGroup,
};
pub use definition::{Definition, LocationEntry, OpEntry, OpMetadata, OutputRef};
pub use exec::{
    add_env, add_mount, add_secret, add_ssh_socket, args, dir, network, sh_args, with_run_options,
    CacheSharing, ExecInfo, ExecState, Mount, MountEntry, MountKind, MountOpt, NetMode, RunOpt,
};
pub use file::{
    allow_not_found, exclude_patterns, include_patterns, merge_lists, with_create_dest_path, CopyInfo, CopyOpt,
    FileAction,
};
pub use platform::Platform;
pub use state::{clean_path, error_state, error_state_option, Op, State};
