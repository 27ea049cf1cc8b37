use std::{path::Path, sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use blesim::{
    library::DeviceLibrary,
    transport::{Loopback, Transport, TransportEvent},
    DeviceConfig, Peripheral, Registry,
};
use clap::{arg, value_parser, ArgAction, ArgMatches, Command};
use log::info;
use tokio::sync::mpsc::UnboundedReceiver;

use super::{shell::Shell, CmdData};

pub fn subcmd<'help>() -> Command<'help> {
    Command::new("run")
        .about("advertise a device and open the operator shell")
        .arg(arg!(<CONFIG> "Path to a device file, or a number or name from the device directory"))
        .arg(
            arg!(
                -t --timeout <SECS> "Seconds to wait for a device switch to start advertising"
            )
            .required(false)
            .default_value("15")
            .value_parser(value_parser!(u64)),
        )
        .arg(
            arg!(
                --loopback "Serve from an in-process transport instead of the bluetooth adapter"
            )
            .action(ArgAction::SetTrue),
        )
}

/// Load a device by path, falling back to a lookup in the device directory.
pub async fn load_device(library: &DeviceLibrary, arg: &str) -> Result<DeviceConfig> {
    let path = Path::new(arg);
    if path.is_file() {
        return DeviceConfig::load(path)
            .await
            .with_context(|| format!("failed to load device file {}", path.display()));
    }
    match library.resolve(arg) {
        Some(entry) => entry
            .load()
            .await
            .with_context(|| format!("failed to load device `{}`", entry.key)),
        None => bail!(
            "`{}` is neither a device file nor a device in {}",
            arg,
            library.dir().display()
        ),
    }
}

pub async fn cmd(data: &mut CmdData, m: &ArgMatches) -> Result<()> {
    let timeout = Duration::from_secs(*m.get_one::<u64>("timeout").unwrap());
    let loopback = *m.get_one::<bool>("loopback").unwrap();

    let library = DeviceLibrary::scan(&data.configs).await?;
    let config = load_device(&library, m.get_one::<String>("CONFIG").unwrap()).await?;

    #[cfg(feature = "bluez")]
    {
        if !loopback {
            let (transport, events) = blesim::bluetooth::BluetoothPeripheral::new()
                .await
                .context("failed to open the bluetooth adapter")?;
            return serve(transport, events, config, library, timeout).await;
        }
    }
    #[cfg(not(feature = "bluez"))]
    {
        if !loopback {
            log::warn!("built without bluetooth support, using the loopback transport");
        }
    }

    let (transport, events) = Loopback::new();
    serve(transport, events, config, library, timeout).await
}

async fn serve<T: Transport + 'static>(
    transport: T,
    events: UnboundedReceiver<TransportEvent>,
    config: DeviceConfig,
    library: DeviceLibrary,
    timeout: Duration,
) -> Result<()> {
    let peripheral =
        Arc::new(Peripheral::new(transport, Registry::new()).with_switch_timeout(timeout));

    let pump = {
        let peripheral = peripheral.clone();
        tokio::spawn(async move { peripheral.run(events).await })
    };

    let label = config.label().to_string();
    if let Err(e) = peripheral.activate(config).await {
        pump.abort();
        return Err(e).with_context(|| format!("failed to start {}", label));
    }
    info!("{} is ready", label);

    let res = Shell::new(peripheral.clone(), library.dir().to_path_buf()).run().await;

    peripheral.shutdown().await;
    pump.abort();
    res
}
