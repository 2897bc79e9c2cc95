//! Uptane client for Datadog Remote Config.
//!
//! Verifies Config and Director TUF repositories, cross-checks Director
//! targets against the Config repository, caches verified target payloads and
//! commits the resulting trust state to a [`TrustStore`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use remote_config_uptane::{RcStore, UptaneClient, UptaneEnv};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = UptaneEnv::from_os_env().client_config()?;
//! let store = Arc::new(RcStore::open("/var/lib/datadog/uptane.db")?);
//! let client = UptaneClient::new(store, "agent", config)?;
//! println!("{}", client.full_state());
//! # Ok(())
//! # }
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod metadata;
pub mod rc_key;
pub mod repository;
pub mod status;
pub mod store;
pub mod uptane_path;
pub mod verifier;

pub use client::{State, UptaneClient};
pub use config::{ClientConfig, ConfigError, TrustAnchors, UptaneEnv, DEFAULT_HISTORY_LIMIT};
pub use error::{ErrorKind, Mismatch, Result, UptaneError};
pub use metadata::RoleName;
pub use rc_key::{RcKey, RcKeyError};
pub use repository::{MetaState, MetaUpdate, Repository, RepositoryKind, RepositoryState};
pub use status::status_report;
pub use store::{RcStore, StoreError, TrustStore};
