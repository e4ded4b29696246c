use std::{
    fmt::Display,
    fs::File,
    io::{BufRead, BufReader},
    net::Ipv4Addr,
    time::Duration,
};

use crate::net::{Interface, MacAddr};

/// Input to a router; used to establish a router's interfaces.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Args {
    /// The port where this host runs.
    pub host_port: u16,
    /// The router's interfaces, in the order they were listed.
    pub links: Vec<LinkDefinition>,
    /// Static routing table to use instead of RIP.
    pub route_file: Option<String>,
    /// Timer overrides given on the command line.
    pub timers: Timers,
}

/// Router timers set with `--rip-interval`, `--route-timeout`, `--arp-retry`
/// and `--arp-max-age`, each taking a number of seconds.
#[derive(Debug, Default, PartialEq, Eq, Clone)]
pub struct Timers {
    pub rip_interval: Option<Duration>,
    pub route_timeout: Option<Duration>,
    pub arp_retry: Option<Duration>,
    pub arp_max_age: Option<Duration>,
}

/// One virtual Ethernet interface and the port its peer listens on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkDefinition {
    pub name: String,
    pub mac: MacAddr,
    pub ip: Ipv4Addr,
    pub mask: Ipv4Addr,
    /// The port where the connected host runs.
    pub remote_port: u16,
}

#[derive(Debug)]
pub enum ParseLinkError {
    NoName,
    NoMac,
    NoIp,
    NoMask,
    NoPort,
    MalformedMac,
    MalformedIp,
    MalformedPort,
}

#[derive(Debug)]
pub enum ParseArgsError {
    MissingFirstLine,
    NoHost,
    NoPort,
    NoLinks,
    MalformedPort,
    /// Line number (1-based) and what was wrong with it.
    MalformedLink(usize, ParseLinkError),
    ReadLineError(std::io::Error),
    OpenLinkFileError(std::io::Error),
    MissingLinkFileArg,
    UnknownOption(String),
    MissingOptionValue(String),
    MalformedOptionValue(String),
}

impl LinkDefinition {
    pub fn try_parse(raw_link: &str) -> Result<Self, ParseLinkError> {
        let mut split = raw_link.split_whitespace();

        let name = split.next().ok_or(ParseLinkError::NoName)?;

        let mac = split
            .next()
            .ok_or(ParseLinkError::NoMac)?
            .parse()
            .map_err(|_| ParseLinkError::MalformedMac)?;

        let ip = split
            .next()
            .ok_or(ParseLinkError::NoIp)?
            .parse()
            .map_err(|_| ParseLinkError::MalformedIp)?;

        let mask = split
            .next()
            .ok_or(ParseLinkError::NoMask)?
            .parse()
            .map_err(|_| ParseLinkError::MalformedIp)?;

        let remote_port = split
            .next()
            .ok_or(ParseLinkError::NoPort)?
            .parse::<u16>()
            .map_err(|_| ParseLinkError::MalformedPort)?;

        Ok(LinkDefinition {
            name: name.to_string(),
            mac,
            ip,
            mask,
            remote_port,
        })
    }

    pub fn interface(&self) -> Interface {
        Interface::new(&self.name, self.ip, self.mask, self.mac)
    }
}

impl Args {
    pub fn parse_from_path(path: &str) -> Result<Args, ParseArgsError> {
        let br = BufReader::new(File::open(path).map_err(ParseArgsError::OpenLinkFileError)?);
        Args::try_parse(br)
    }

    pub fn try_parse<B>(reader: B) -> Result<Args, ParseArgsError>
    where
        B: BufRead,
    {
        let mut lines = reader.lines();
        let host_ip_port = lines
            .next()
            .ok_or(ParseArgsError::MissingFirstLine)?
            .map_err(ParseArgsError::ReadLineError)?;

        let mut ip_port = host_ip_port.split_whitespace();
        // ignored: assume localhost
        let _ip = ip_port.next().ok_or(ParseArgsError::NoHost)?;
        let port = ip_port
            .next()
            .ok_or(ParseArgsError::NoPort)?
            .parse::<u16>()
            .map_err(|_| ParseArgsError::MalformedPort)?;

        let mut links = Vec::new();
        for (idx, line) in lines.enumerate() {
            let raw_link = line.map_err(ParseArgsError::ReadLineError)?;
            let raw_link = raw_link.trim();
            if raw_link.is_empty() || raw_link.starts_with('#') {
                continue;
            }
            links.push(
                LinkDefinition::try_parse(raw_link)
                    .map_err(|e| ParseArgsError::MalformedLink(idx + 2, e))?,
            );
        }

        if links.is_empty() {
            return Err(ParseArgsError::NoLinks);
        }

        Ok(Args {
            host_port: port,
            links,
            route_file: None,
            timers: Timers::default(),
        })
    }

    /// Parse the command line: the link file, an optional route file and
    /// any timer options, in that order after the program name.
    pub fn from_cli<I>(args: I) -> Result<Args, ParseArgsError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut args = args.into_iter().skip(1).peekable();
        let link_file_path = args.next().ok_or(ParseArgsError::MissingLinkFileArg)?;
        let mut parsed_args = Args::parse_from_path(&link_file_path)?;

        if let Some(path) = args.next_if(|a| !a.starts_with("--")) {
            parsed_args.route_file = Some(path);
        }
        parsed_args.timers = Timers::try_parse(args)?;
        Ok(parsed_args)
    }

    pub fn interfaces(&self) -> Vec<Interface> {
        self.links.iter().map(LinkDefinition::interface).collect()
    }
}

impl Timers {
    pub fn try_parse<I>(options: I) -> Result<Timers, ParseArgsError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut timers = Timers::default();
        let mut options = options.into_iter();

        while let Some(option) = options.next() {
            let slot = match option.as_str() {
                "--rip-interval" => &mut timers.rip_interval,
                "--route-timeout" => &mut timers.route_timeout,
                "--arp-retry" => &mut timers.arp_retry,
                "--arp-max-age" => &mut timers.arp_max_age,
                _ => return Err(ParseArgsError::UnknownOption(option)),
            };
            let secs = options
                .next()
                .ok_or_else(|| ParseArgsError::MissingOptionValue(option.clone()))?
                .parse::<u64>()
                .map_err(|_| ParseArgsError::MalformedOptionValue(option.clone()))?;
            *slot = Some(Duration::from_secs(secs));
        }

        Ok(timers)
    }
}

impl TryFrom<std::env::Args> for Args {
    type Error = ParseArgsError;

    fn try_from(args: std::env::Args) -> Result<Self, Self::Error> {
        Args::from_cli(args)
    }
}

impl Display for Args {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Running on port {}", self.host_port)?;
        for lnk in self.links.iter() {
            write!(f, "\n{}:{}", lnk.name, lnk.ip)?;
        }
        Ok(())
    }
}
