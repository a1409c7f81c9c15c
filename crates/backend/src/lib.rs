//! autest execution backends.
//!
//! A [`Backend`] stages, updates, and verifies an OS image on one kind of
//! target. Two implementations exist:
//!
//! - [`RemoteBackend`]: an already-provisioned physical device, updated over
//!   the network with `image_to_live.sh`
//! - [`VmBackend`]: a local emulated machine whose process is tracked through a
//!   PID marker owned by [`VmProcessGuard`]
//!
//! Every external step goes through the [`CommandRunner`] seam, so backends can
//! be exercised without the real image tools.
//!
//! # Modules
//! - [`error`]: `BackendError`
//! - [`exec`]: command specs and the `CommandRunner` trait
//! - [`report`]: verification output parsing
//! - [`backend`]: the `Backend` trait
//! - [`remote`], [`vm`], [`vm_process`]: implementations

pub mod backend;
pub mod error;
pub mod exec;
pub mod remote;
pub mod report;
pub mod vm;
pub mod vm_process;

pub use backend::Backend;
pub use error::BackendError;
pub use exec::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner};
pub use remote::RemoteBackend;
pub use report::{assert_enough_passed, parse_report};
pub use vm::VmBackend;
pub use vm_process::VmProcessGuard;
