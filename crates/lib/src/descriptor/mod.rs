//! Environment descriptors.
//!
//! A descriptor is the declarative input: a base image, directories, package
//! requirements and source copies, written with `FROM`/`WORKDIR`/`RUN`/`COPY`.

mod parse;
mod types;

pub use parse::{parse, parse_file};
pub use types::*;
