#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod backoff;
pub mod bus;
pub mod config;
pub mod error;
pub mod manager;
pub mod registry;
mod timer;
pub mod transport;

pub use config::Config;
pub use manager::LifecycleManager;
pub use registry::{Counters, Registry};
pub use transport::{ABNORMAL_CLOSE, ERROR_CLOSE, INTENTIONAL_CLOSE};

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;
