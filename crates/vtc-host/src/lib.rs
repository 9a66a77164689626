#![doc = include_str!("../README.md")]

pub mod backend;
pub mod codec;
pub mod kernels;
pub mod memory;

pub use backend::{HostBackend, execution_context};
