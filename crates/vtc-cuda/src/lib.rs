#![doc = include_str!("../README.md")]

pub mod backend;
pub mod kernels;
pub mod memory;

pub use backend::{CudaBackend, execution_context};
pub use memory::{CudaAllocation, CudaStreamHandle};
