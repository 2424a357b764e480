mod common;

mod build_tests;
mod plan_tests;
mod snapshot_tests;
