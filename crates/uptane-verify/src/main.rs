// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, fs, process::ExitCode, sync::Arc};

use remote_config_proto::LatestConfigsResponse;
use remote_config_uptane::{RcStore, StoreError, TrustStore, UptaneClient, UptaneEnv};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

/// Exit code for unusable arguments, configuration or input files.
const EXIT_USAGE: u8 = 2;
/// Exit code for a bundle the client refused.
const EXIT_REJECTED: u8 = 1;

pub fn main() -> ExitCode {
    let log_level = env::var("DD_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());
    let env_filter = format!("sled=off,{}", log_level);

    let filter = match EnvFilter::try_new(env_filter) {
        Ok(filter) => filter,
        Err(err) => {
            eprintln!("could not parse log level in configuration: {err}");
            return ExitCode::from(EXIT_USAGE);
        }
    };
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {err}");
        return ExitCode::from(EXIT_USAGE);
    }
    debug!("Logging subsystem enabled");

    let Some(bundle_path) = env::args().nth(1) else {
        error!("usage: uptane-verify <bundle.json>");
        return ExitCode::from(EXIT_USAGE);
    };

    let uptane_env = UptaneEnv::from_os_env();
    let config = match uptane_env.client_config() {
        Ok(config) => config,
        Err(err) => {
            error!("invalid configuration: {err}");
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let bundle = match read_bundle(&bundle_path) {
        Ok(bundle) => bundle,
        Err(err) => {
            error!("could not read update bundle {bundle_path}: {err}");
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let store = match open_store(uptane_env.store_path.as_deref()) {
        Ok(store) => store,
        Err(err) => {
            error!("could not open trust store: {err}");
            eprintln!("storage_failure");
            return ExitCode::from(EXIT_REJECTED);
        }
    };

    let client = match UptaneClient::new(store, uptane_env.cache_key(), config) {
        Ok(client) => client,
        Err(err) => {
            error!("could not initialise uptane client: {err}");
            eprintln!("{}", err.kind());
            return ExitCode::from(EXIT_REJECTED);
        }
    };

    if let Err(err) = client.update(&bundle) {
        error!("update rejected: {err}");
        eprintln!("{}", err.kind());
        return ExitCode::from(EXIT_REJECTED);
    }
    info!(cache_key = client.cache_key(), "Update bundle applied");

    match serde_json::to_string_pretty(&client.full_state()) {
        Ok(report) => {
            println!("{report}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("could not render status report: {err}");
            ExitCode::from(EXIT_REJECTED)
        }
    }
}

fn read_bundle(path: &str) -> Result<LatestConfigsResponse, Box<dyn std::error::Error>> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Opens the on-disk store when a path is configured, an in-memory one otherwise.
fn open_store(path: Option<&str>) -> Result<Arc<dyn TrustStore>, StoreError> {
    let store = match path {
        Some(path) => RcStore::open(path)?,
        None => RcStore::open_ephemeral()?,
    };
    Ok(Arc::new(store))
}
