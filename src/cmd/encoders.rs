use anyhow::{Context, Result};
use blesim::{encoder, BytesExt};
use clap::{arg, ArgMatches, Command};

use super::CmdData;

pub fn subcmd<'help>() -> Command<'help> {
    Command::new("encoders").about("list the available value encoders")
}

pub fn encode_subcmd<'help>() -> Command<'help> {
    Command::new("encode")
        .about("encode values and print the resulting bytes")
        .arg(arg!(<TYPE> "Encoder name, see `encoders`"))
        .arg(
            arg!(<VALUES> "Values to encode")
                .multiple_values(true)
                .allow_hyphen_values(true),
        )
}

pub fn print_encoders() {
    for info in encoder::list_encoders() {
        println!("  {:<16} {}", info.name, info.description);
        println!("  {:<16} e.g. {}", "", info.example);
    }
}

pub async fn cmd(_data: &mut CmdData, _m: &ArgMatches) -> Result<()> {
    print_encoders();
    Ok(())
}

pub async fn encode_cmd(_data: &mut CmdData, m: &ArgMatches) -> Result<()> {
    let kind = m.get_one::<String>("TYPE").unwrap();
    let values: Vec<&String> = m.get_many::<String>("VALUES").unwrap().collect();

    let bytes = encoder::encode_tokens(kind, &values)
        .with_context(|| format!("failed to encode with `{}`", kind))?;
    println!("{}", bytes.to_hex());
    Ok(())
}
