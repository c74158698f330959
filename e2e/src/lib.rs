#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod acquire;
pub mod boskos;
pub mod cloud;
pub mod config;
pub mod driver;
pub mod error;
pub mod fs;
pub mod lease;
pub mod prow;
pub mod remote;

pub mod test_utils;

pub use acquire::{acquire_lease, AcquireOptions, Heartbeat};
pub use boskos::{BoskosClient, LeaseClient};
pub use config::HarnessConfig;
pub use error::{Error, Result};
pub use lease::{Lease, LeaseState, UserData};
pub use remote::{RemoteInstance, SshInstance};
