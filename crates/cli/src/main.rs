//! Strata remote server launcher.
//!
//! Loads `strata-remote.toml` (or the file given with `--config`), binds the
//! listener and serves until stdin reaches end of file, then shuts down.
//! Log verbosity follows `RUST_LOG` (default `info`).

mod commands;

use std::io;
use std::path::{Path, PathBuf};
use std::process;

use strata_core::StrataResult;
use strata_server::{RemoteServer, ServerConfig, CONFIG_FILE_NAME};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use commands::build_cli;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    let matches = build_cli().get_matches();
    let path = matches
        .get_one::<String>("config")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));

    if matches.get_flag("init") {
        match ServerConfig::write_default_if_missing(&path) {
            Ok(()) => println!("Configuration at {}", path.display()),
            Err(e) => {
                eprintln!("{}", e);
                process::exit(1);
            }
        }
        return;
    }

    let bind = matches.get_one::<String>("bind").cloned();
    if let Err(e) = run(&path, bind) {
        error!(target: "strata::server", error = %e, "Server failed");
        process::exit(1);
    }
}

fn run(path: &Path, bind: Option<String>) -> StrataResult<()> {
    let mut config = ServerConfig::load_or_default(path)?;
    if let Some(bind) = bind {
        config.bind = bind;
    }
    let handle = RemoteServer::bind(config)?.spawn()?;
    info!(
        target: "strata::server",
        addr = %handle.local_addr(),
        "Serving until stdin closes"
    );

    // Blocks until EOF; the content is ignored
    io::copy(&mut io::stdin().lock(), &mut io::sink())?;

    let stats = handle.stats();
    info!(
        target: "strata::server",
        connections = stats.total_connections,
        collections = stats.collections,
        "Stopping"
    );
    handle.shutdown();
    Ok(())
}
