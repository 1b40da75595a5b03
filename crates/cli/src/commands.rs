//! Clap command definition.

use clap::{Arg, ArgAction, Command};
use strata_server::CONFIG_FILE_NAME;

/// Build the launcher's command line.
pub fn build_cli() -> Command {
    Command::new("strata-remote")
        .about("Serve Strata collections over the binary remote protocol")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_name("PATH")
                .help(format!("Configuration file (default: ./{})", CONFIG_FILE_NAME)),
        )
        .arg(
            Arg::new("bind")
                .long("bind")
                .short('b')
                .value_name("ADDR")
                .help("Listen address, overriding the configuration file"),
        )
        .arg(
            Arg::new("init")
                .long("init")
                .help("Write a commented default configuration file and exit")
                .action(ArgAction::SetTrue),
        )
}
