//! envbake-lib: Core types and logic for envbake
//!
//! This crate turns an environment descriptor into a deterministic filesystem
//! snapshot:
//! - `Descriptor`: the parsed instruction list (`FROM`, `WORKDIR`, `RUN`, `COPY`)
//! - `Plan`: the validated, ordered form of a descriptor
//! - `Snapshot`: the owned filesystem state threaded through the pipeline
//! - `Pipeline`: base resolution, directory provisioning, package installation
//!   and source materialization, applied strictly in that order
//! - `SnapshotStore`: on-disk record of completed bakes

pub mod bake;
pub mod config;
pub mod consts;
pub mod descriptor;
pub mod install;
pub mod materialize;
pub mod paths;
pub mod pipeline;
pub mod placeholder;
pub mod plan;
pub mod provision;
pub mod resolve;
pub mod snapshot;
pub mod store_lock;
pub mod util;
