//! reqcache
//!
//! Wraps an async fetch function with argument-keyed result caching, optional
//! expiry, observable loading/error state, success/error/finally subscribers
//! and reactive cells that follow cached results.

pub mod cache;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod logging;
pub mod reactive;

mod lock;

pub use cache::{CacheKey, CachedData};
pub use config::EngineConfig;
pub use engine::{Engine, EngineBuilder};
pub use error::{ExecuteError, KeyError, RefError};
pub use events::{EventHook, Subscription};
pub use reactive::{GroupRef, Ref, RefId};
