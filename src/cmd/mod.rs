use std::path::PathBuf;

use anyhow::Result;
use clap::{arg, ArgAction, ArgMatches, Command};

mod devices;
mod encoders;
mod run;
mod shell;

pub struct CmdData {
    configs: PathBuf,
}

pub fn app() -> Command<'static> {
    Command::new("ble-sim")
        .version("0.1")
        .about("Simulate a BLE GATT peripheral from a device description")
        .arg(
            arg!(
            -v --verbose "Enable verbose output"
            )
            .action(ArgAction::SetTrue),
        )
        .arg(
            arg!(
                -d --devices <DIR> "Directory with device description files"
            )
            .required(false)
            .default_value("configs"),
        )
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(run::subcmd())
        .subcommand(encoders::subcmd())
        .subcommand(encoders::encode_subcmd())
        .subcommand(devices::subcmd())
}

pub async fn run(matches: ArgMatches) -> Result<()> {
    let configs = PathBuf::from(matches.get_one::<String>("devices").unwrap());

    let mut data = CmdData { configs };

    match matches.subcommand() {
        Some(("run", matches)) => run::cmd(&mut data, matches).await,
        Some(("encoders", matches)) => encoders::cmd(&mut data, matches).await,
        Some(("encode", matches)) => encoders::encode_cmd(&mut data, matches).await,
        Some(("devices", matches)) => devices::cmd(&mut data, matches).await,
        _ => unreachable!(),
    }
}
