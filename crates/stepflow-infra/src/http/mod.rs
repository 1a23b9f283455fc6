//! Outbound HTTP for `http` steps.

pub mod client;

pub use client::ReqwestHttpExecutor;
