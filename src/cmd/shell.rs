use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use blesim::{
    config::format_properties, library::DeviceLibrary, transport::Transport, BytesExt,
    Encoder, Error, Notified, Peripheral,
};
use log::{debug, error};
use termion::{color, style};
use tokio::io::{AsyncBufReadExt, BufReader};

use super::{encoders::print_encoders, run::load_device};

#[derive(Debug, PartialEq, Eq)]
enum Line<'a> {
    Help,
    List,
    Read(&'a str),
    Write(&'a str, Vec<&'a str>),
    Notify(&'a str, Vec<&'a str>),
    Encoders,
    Devices,
    Switch(&'a str),
    Exit,
    Empty,
    Usage(&'static str),
    Unknown(&'a str),
}

fn parse_line(line: &str) -> Line<'_> {
    let mut words = line.split_whitespace();
    let cmd = match words.next() {
        Some(x) => x,
        None => return Line::Empty,
    };
    let name = words.next();
    let rest: Vec<&str> = words.collect();
    match (cmd, name) {
        ("help" | "?", _) => Line::Help,
        ("list" | "ls", _) => Line::List,
        ("encoders", _) => Line::Encoders,
        ("devices", _) => Line::Devices,
        ("exit" | "quit", _) => Line::Exit,
        ("read", Some(name)) => Line::Read(name),
        ("read", None) => Line::Usage("read <characteristic>"),
        ("write", Some(name)) => Line::Write(name, rest),
        ("write", None) => Line::Usage("write <characteristic> <values...>"),
        ("notify", Some(name)) => Line::Notify(name, rest),
        ("notify", None) => Line::Usage("notify <characteristic> <values...>"),
        ("switch", Some(name)) => Line::Switch(name),
        ("switch", None) => Line::Usage("switch <number|name>"),
        (x, _) => Line::Unknown(x),
    }
}

fn print_help() {
    println!("commands:");
    println!("  list                          show characteristics and their values");
    println!("  read <name>                   show the value of a characteristic");
    println!("  write <name> <values...>      set a value without notifying");
    println!("  notify <name> <values...>     set a value and push it to the subscriber");
    println!("  encoders                      list the value encoders");
    println!("  devices                       list the device files");
    println!("  switch <number|name>          replace the running device");
    println!("  exit                          stop advertising and quit");
}

fn print_value(value: &[u8]) {
    println!(
        "  {}[{}]{} {:?}",
        color::Fg(color::Green),
        value.to_hex(),
        color::Fg(color::Reset),
        String::from_utf8_lossy(value)
    );
}

fn print_error(e: &dyn std::fmt::Display) {
    println!(
        "{}error:{} {}",
        color::Fg(color::Red),
        color::Fg(color::Reset),
        e
    );
}

/// Interactive operator console for a running peripheral.
pub struct Shell<T> {
    peripheral: Arc<Peripheral<T>>,
    devices: PathBuf,
}

impl<T: Transport + 'static> Shell<T> {
    pub fn new(peripheral: Arc<Peripheral<T>>, devices: PathBuf) -> Self {
        Shell {
            peripheral,
            devices,
        }
    }

    /// Read commands from stdin until `exit`, end of input or Ctrl-C.
    pub async fn run(&self) -> Result<()> {
        print_help();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let line = match line? {
                        Some(x) => x,
                        None => {
                            debug!("stdin closed");
                            return Ok(());
                        }
                    };
                    if !self.execute(&line).await {
                        return Ok(());
                    }
                }
                res = tokio::signal::ctrl_c() => {
                    res?;
                    println!();
                    return Ok(());
                }
            }
        }
    }

    /// Run one line, returns false when the shell should stop.
    async fn execute(&self, line: &str) -> bool {
        let dispatcher = self.peripheral.dispatcher();
        match parse_line(line) {
            Line::Empty => {}
            Line::Help => print_help(),
            Line::Exit => return false,
            Line::Usage(x) => println!("usage: {}", x),
            Line::Unknown(x) => println!("unknown command `{}`, try `help`", x),
            Line::List => self.list(),
            Line::Encoders => print_encoders(),
            Line::Devices => self.devices().await,
            Line::Read(name) => match dispatcher.on_read(name) {
                Ok(value) => print_value(&value),
                Err(e) => print_error(&e),
            },
            Line::Write(name, values) => match dispatcher.write_tokens(name, &values) {
                Ok(value) => print_value(&value),
                Err(e) => self.print_value_error("write", name, e),
            },
            Line::Notify(name, values) => match dispatcher.notify_tokens(name, &values) {
                Ok((value, notified)) => {
                    print_value(&value);
                    if notified == Notified::NoSubscriber {
                        println!("  no client subscribed, value stored only");
                    }
                }
                Err(e) => self.print_value_error("notify", name, e),
            },
            Line::Switch(arg) => self.switch(arg).await,
        }
        true
    }

    fn print_value_error(&self, cmd: &str, name: &str, e: Error) {
        print_error(&e);
        if !matches!(e, Error::InvalidArgument(_) | Error::InsufficientArguments(_)) {
            return;
        }
        let encoder = self
            .peripheral
            .registry()
            .config(name)
            .and_then(|x| x.encoder_type().and_then(Encoder::from_name));
        if let Some(encoder) = encoder {
            println!("  example: {} {} {}", cmd, name, encoder.example());
        }
    }

    fn list(&self) {
        let current = match self.peripheral.current() {
            Some(x) => x,
            None => {
                println!("no device running");
                return;
            }
        };
        println!(
            "{}{}{} ({:?})",
            style::Bold,
            current.label(),
            style::Reset,
            self.peripheral.lifecycle()
        );
        for c in self.peripheral.dispatcher().list() {
            let subscribed = if c.subscribed { " *subscribed*" } else { "" };
            println!(
                "  {:<24} {:<32} {}{}",
                c.name,
                format_properties(c.properties),
                c.encoder.as_deref().unwrap_or("-"),
                subscribed
            );
            print_value(&c.value);
        }
    }

    /// Device files are scanned on every use so files added while running show up.
    async fn library(&self) -> Option<DeviceLibrary> {
        match DeviceLibrary::scan(&self.devices).await {
            Ok(x) => Some(x),
            Err(e) => {
                print_error(&e);
                None
            }
        }
    }

    async fn devices(&self) {
        let library = match self.library().await {
            Some(x) => x,
            None => return,
        };
        if library.is_empty() {
            println!("no device files in {}", library.dir().display());
            return;
        }
        let current = match self.peripheral.current() {
            Some(x) => library.find_by_name(&x.name).await.map(|x| x.number),
            None => None,
        };
        for entry in library.entries() {
            let marker = if current == Some(entry.number) { "*" } else { " " };
            println!("{} {:>3}. {}", marker, entry.number, entry.key);
        }
    }

    async fn switch(&self, arg: &str) {
        let library = match self.library().await {
            Some(x) => x,
            None => return,
        };
        let config = match load_device(&library, arg).await {
            Ok(x) => x,
            Err(e) => {
                print_error(&e);
                return;
            }
        };
        let label = config.label().to_string();
        match self.peripheral.switch_to(config).await {
            Ok(()) => println!("switched to {}", label),
            Err(e) => {
                error!("switch to {} failed: {}", label, e);
                print_error(&e);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_commands() {
        assert_eq!(parse_line("   "), Line::Empty);
        assert_eq!(parse_line("list"), Line::List);
        assert_eq!(parse_line("read level"), Line::Read("level"));
        assert_eq!(
            parse_line("notify bp 120  80 72"),
            Line::Notify("bp", vec!["120", "80", "72"])
        );
        assert_eq!(parse_line("write name"), Line::Write("name", vec![]));
        assert_eq!(parse_line("switch 2"), Line::Switch("2"));
        assert_eq!(parse_line("quit"), Line::Exit);
    }

    #[test]
    fn parse_missing_operand() {
        assert!(matches!(parse_line("read"), Line::Usage(_)));
        assert!(matches!(parse_line("notify"), Line::Usage(_)));
        assert_eq!(parse_line("frobnicate x"), Line::Unknown("frobnicate"));
    }
}
