//! Local command surface of the daemon

pub mod server;

pub use server::{dispatch, serve};
