use crate::node::Node;
use crate::repl::{HandleUserInput, HandleUserInputError, Repl};
use async_trait::async_trait;
use std::fmt::Display;
use std::fs::File;
use std::io::Write;
use std::str::SplitWhitespace;
use std::sync::Arc;

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    ListInterface(Option<String>),
    ListRoute(Option<String>),
    ListArp(Option<String>),
    InterfaceDown(String),
    InterfaceUp(String),
    Quit,
}

pub struct Cli {
    node: Arc<Node>,
}

impl Cli {
    pub fn new(node: Arc<Node>) -> Self {
        Self { node }
    }

    pub async fn run(self) {
        Repl::new(self, ">> ").serve().await;
    }

    fn parse_command(line: &str) -> Result<Command, ParseError> {
        let mut tokens = line.split_whitespace();
        let cmd = tokens.next().ok_or(ParseError::Unknown)?;
        cmd_arg_handler(cmd, tokens)
    }

    async fn execute_command(&self, cmd: Command) {
        match cmd {
            Command::ListInterface(op) => {
                self.print_interfaces(op);
            }
            Command::ListRoute(op) => {
                self.print_routes(op).await;
            }
            Command::ListArp(op) => {
                self.print_arp_cache(op).await;
            }
            Command::InterfaceDown(interface) => {
                eprintln!("Turning down interface {}", interface);
                if let Err(e) = self.node.deactivate(&interface) {
                    eprintln!("Failed to turn interface {} down: {:?}", interface, e);
                }
            }
            Command::InterfaceUp(interface) => {
                eprintln!("Turning up interface {}", interface);
                if let Err(e) = self.node.activate(&interface) {
                    eprintln!("Failed to turn interface {} up: {:?}", interface, e);
                }
            }
            Command::Quit => {
                eprintln!("Quitting");
            }
        }
    }

    fn print_interfaces(&self, file: Option<String>) {
        let mut out = String::from("state\tname\tip\t\tmac\t\t\tport\n");
        for link in self.node.iter_links() {
            out.push_str(&format!("{}\n", link));
        }
        emit(file, &out);
    }

    async fn print_routes(&self, file: Option<String>) {
        let rt = self.node.get_routes().await;
        emit(file, &format!("dest\t\tgateway\t\tmask\t\tiface\tcost\n{}", rt));
    }

    async fn print_arp_cache(&self, file: Option<String>) {
        let arp = self.node.get_arp_cache().await;
        emit(file, &format!("ip\t\tmac\n{}", arp));
    }
}

/// Print `text`, or write it to `file` when one is given.
fn emit(file: Option<String>, text: &str) {
    match file {
        Some(path) => {
            let written = File::create(&path).and_then(|mut f| f.write_all(text.as_bytes()));
            if let Err(e) = written {
                eprintln!("Failed to write {}: {}", path, e);
            }
        }
        None => print!("{}", text),
    }
}

#[async_trait]
impl HandleUserInput for Cli {
    async fn handle(&mut self, user_input: String) -> Result<(), HandleUserInputError> {
        match Cli::parse_command(&user_input) {
            Ok(Command::Quit) => {
                eprintln!("Commencing Graceful Shutdown");
                self.execute_command(Command::Quit).await;
                Err(HandleUserInputError::Terminate)
            }
            Ok(cmd) => {
                self.execute_command(cmd).await;
                Ok(())
            }
            Err(e) => {
                eprintln!("{e}");
                Ok(())
            }
        }
    }
}

fn cmd_arg_handler(cmd: &str, mut tokens: SplitWhitespace) -> Result<Command, ParseError> {
    match cmd {
        "li" | "interfaces" => Ok(Command::ListInterface(tokens.next().map(String::from))),
        "lr" | "routes" => Ok(Command::ListRoute(tokens.next().map(String::from))),
        "arp" => Ok(Command::ListArp(tokens.next().map(String::from))),
        "down" => {
            let iface = tokens.next().ok_or(ParseDownError::NoInterface)?;
            Ok(Command::InterfaceDown(iface.to_string()))
        }
        "up" => {
            let iface = tokens.next().ok_or(ParseUpError::NoInterface)?;
            Ok(Command::InterfaceUp(iface.to_string()))
        }
        "q" | "quit" => Ok(Command::Quit),
        _ => Err(ParseError::Unknown),
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ParseDownError {
    NoInterface,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ParseUpError {
    NoInterface,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    Unknown,
    Down(ParseDownError),
    Up(ParseUpError),
}

impl Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::Unknown => write!(
                f,
                "Unknown command. Commands: interfaces, routes, arp, up <iface>, down <iface>, quit"
            ),
            ParseError::Down(e) => write!(
                f,
                "Invalid down command. Usage: down <interface>. Error: {:?}",
                e
            ),
            ParseError::Up(e) => {
                write!(f, "Invalid up command. Usage: up <interface>. Error: {:?}", e)
            }
        }
    }
}

impl From<ParseUpError> for ParseError {
    fn from(v: ParseUpError) -> Self {
        ParseError::Up(v)
    }
}

impl From<ParseDownError> for ParseError {
    fn from(v: ParseDownError) -> Self {
        ParseError::Down(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_listing_commands() {
        assert_eq!(
            Cli::parse_command("li").unwrap(),
            Command::ListInterface(None)
        );
        assert_eq!(
            Cli::parse_command("interfaces out.txt").unwrap(),
            Command::ListInterface(Some("out.txt".into()))
        );
        assert_eq!(Cli::parse_command("routes").unwrap(), Command::ListRoute(None));
        assert_eq!(
            Cli::parse_command("lr routes.txt").unwrap(),
            Command::ListRoute(Some("routes.txt".into()))
        );
        assert_eq!(Cli::parse_command("arp").unwrap(), Command::ListArp(None));
    }

    #[test]
    fn parse_interface_toggles() {
        assert_eq!(
            Cli::parse_command("down").unwrap_err(),
            ParseDownError::NoInterface.into()
        );
        assert_eq!(
            Cli::parse_command("up").unwrap_err(),
            ParseUpError::NoInterface.into()
        );
        assert_eq!(
            Cli::parse_command("down eth1").unwrap(),
            Command::InterfaceDown("eth1".into())
        );
        assert_eq!(
            Cli::parse_command("up eth1").unwrap(),
            Command::InterfaceUp("eth1".into())
        );
    }

    #[test]
    fn parse_quit_and_unknown() {
        assert_eq!(Cli::parse_command("q").unwrap(), Command::Quit);
        assert_eq!(Cli::parse_command("quit").unwrap(), Command::Quit);
        assert_eq!(Cli::parse_command("send 1.2.3.4").unwrap_err(), ParseError::Unknown);
        assert_eq!(Cli::parse_command("").unwrap_err(), ParseError::Unknown);
    }
}
