use crate::codec::Operation;
use crate::control::{ControlChannel, DeviceChannel, SocketChannel, DEFAULT_DEVICE_PATH};
use crate::error::{MfwError, Result};
use crate::models::rule::{parse_protocol, Direction, EndpointLiteral, Rule};
use clap::{ArgGroup, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "mfw")]
#[command(
    about = "MiniFirewall implements an exact match algorithm, where unspecified options are ignored.",
    long_about = None
)]
#[command(args_conflicts_with_subcommands = true)]
#[command(group(ArgGroup::new("mode").args(["add", "remove", "view"]).multiple(false)))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// input
    #[arg(short = 'i', long = "in", conflicts_with = "outbound")]
    pub inbound: bool,

    /// output
    #[arg(short = 'o', long = "out")]
    pub outbound: bool,

    /// source ip address
    #[arg(short = 's', long = "s_ip", value_name = "IPADDR")]
    pub s_ip: Option<String>,

    /// source mask
    #[arg(short = 'm', long = "s_mask", value_name = "MASK")]
    pub s_mask: Option<String>,

    /// source port
    #[arg(short = 'p', long = "s_port", value_name = "PORT")]
    pub s_port: Option<String>,

    /// destination ip address
    #[arg(short = 'd', long = "d_ip", value_name = "IPADDR")]
    pub d_ip: Option<String>,

    /// destination mask
    #[arg(short = 'n', long = "d_mask", value_name = "MASK")]
    pub d_mask: Option<String>,

    /// destination port
    #[arg(short = 'q', long = "d_port", value_name = "PORT")]
    pub d_port: Option<String>,

    /// protocol (0, 6, 17, any, tcp or udp)
    #[arg(short = 'c', long = "proto", value_name = "PROTO")]
    pub proto: Option<String>,

    /// add a rule
    #[arg(short = 'a', long = "add")]
    pub add: bool,

    /// remove a rule
    #[arg(short = 'r', long = "remove")]
    pub remove: bool,

    /// view rules
    #[arg(short = 'v', long = "view")]
    pub view: bool,

    /// Device node of the engine's raw control interface
    #[arg(long, value_name = "PATH", conflicts_with = "socket")]
    pub device: Option<PathBuf>,

    /// Talk to `mfw serve` over its acknowledged control socket
    #[arg(long, value_name = "PATH")]
    pub socket: Option<PathBuf>,

    /// Add or remove every rule listed in a YAML or JSON policy file
    #[arg(
        long,
        value_name = "FILE",
        conflicts_with_all = ["view", "inbound", "outbound", "s_ip", "s_mask", "s_port", "d_ip", "d_mask", "d_port", "proto"]
    )]
    pub policy: Option<PathBuf>,

    /// Output format for --view
    #[arg(long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the classification engine and its control socket
    Serve {
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Yaml,
    Json,
}

/// What a rule-editing invocation asks for, after semantic checks.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Submit { operation: Operation, rule: Rule },
    Policy { operation: Operation, path: PathBuf },
    View,
}

impl Cli {
    pub fn to_request(&self) -> Result<Request> {
        let operation = if self.add {
            Operation::Add
        } else if self.remove {
            Operation::Remove
        } else if self.view {
            return Ok(Request::View);
        } else {
            return Err(MfwError::usage("Please specify mode --(add|remove|view)"));
        };

        if let Some(path) = &self.policy {
            return Ok(Request::Policy {
                operation,
                path: path.clone(),
            });
        }

        let direction = match (self.inbound, self.outbound) {
            (true, false) => Direction::In,
            (false, true) => Direction::Out,
            (true, true) => return Err(MfwError::usage("Please select either In or Out")),
            (false, false) => return Err(MfwError::usage("Please specify either In or Out")),
        };

        let source = EndpointLiteral {
            address: self.s_ip.as_deref(),
            mask: self.s_mask.as_deref(),
            port: parse_port(self.s_port.as_deref(), "source")?,
        };
        let destination = EndpointLiteral {
            address: self.d_ip.as_deref(),
            mask: self.d_mask.as_deref(),
            port: parse_port(self.d_port.as_deref(), "destination")?,
        };
        let protocol = match self.proto.as_deref() {
            Some(literal) => parse_protocol(literal)?,
            None => 0,
        };

        let rule = Rule::from_literals(direction, &source, &destination, protocol)?;
        Ok(Request::Submit { operation, rule })
    }

    /// Socket when `--socket` is given, the device node otherwise.
    pub fn channel(&self) -> Box<dyn ControlChannel> {
        match (&self.socket, &self.device) {
            (Some(socket), _) => Box::new(SocketChannel::new(socket)),
            (None, Some(device)) => Box::new(DeviceChannel::new(device)),
            (None, None) => Box::new(DeviceChannel::new(DEFAULT_DEVICE_PATH)),
        }
    }
}

fn parse_port(literal: Option<&str>, side: &str) -> Result<u16> {
    match literal {
        None => Ok(0),
        Some(literal) => literal
            .parse::<u16>()
            .map_err(|_| MfwError::usage(format!("Invalid {} port number", side))),
    }
}
