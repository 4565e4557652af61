#![allow(dead_code)]

pub mod builders;
pub mod fixtures;

pub use builders::{ModelBuilder, PolicyFileBuilder};
pub use fixtures::TestPolicyDir;
