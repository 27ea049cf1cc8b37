use anyhow::Result;
use blesim::{config::format_properties, library::DeviceLibrary};
use clap::{arg, ArgAction, ArgMatches, Command};
use log::warn;

use super::CmdData;

pub fn subcmd<'help>() -> Command<'help> {
    Command::new("devices")
        .about("list the device files in the device directory")
        .arg(arg!( -l --long "also print services and characteristics").action(ArgAction::SetTrue))
}

pub async fn cmd(data: &mut CmdData, m: &ArgMatches) -> Result<()> {
    let long = *m.get_one::<bool>("long").unwrap();
    let library = DeviceLibrary::scan(&data.configs).await?;
    if library.is_empty() {
        println!("no device files in {}", library.dir().display());
        return Ok(());
    }

    for entry in library.entries() {
        let config = match entry.load().await {
            Ok(x) => x,
            Err(e) => {
                warn!("skipping {}: {}", entry.path.display(), e);
                continue;
            }
        };
        println!("{:>3}. {:<20} {}", entry.number, entry.key, config.label());
        if !long {
            continue;
        }
        for service in config.services.iter() {
            println!("       service {}", service.uuid);
            for c in service.characteristics.iter() {
                println!(
                    "         {:<20} {} [{}] {}",
                    c.name,
                    c.uuid,
                    format_properties(c.properties),
                    c.encoder_type().unwrap_or("-")
                );
            }
        }
    }
    Ok(())
}
