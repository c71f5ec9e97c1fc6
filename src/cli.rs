use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::model::Family;

#[derive(Parser, Debug)]
#[command(
    name = "smcstat",
    version,
    about = "SMC connection and link-group diagnostics"
)]
pub struct Cli {
    /// JSON file describing namespaces, link groups and connections
    #[arg(long)]
    pub state: Option<PathBuf>,

    /// Network namespace to report on [default: 0]
    #[arg(long, default_value_t = 0)]
    pub netns: u32,

    /// Most namespaces the loaded state may register, the initial one included
    #[arg(long, value_parser = validate_max_netns)]
    pub max_netns: Option<usize>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the connection report of one address family
    Conns(ConnsArgs),
    /// Print the link-group report
    Links(LinksArgs),
    /// Read or write a tunable of the selected namespace
    Sysctl(SysctlArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ConnsArgs {
    /// Address family [default: v4]
    #[arg(long, default_value = "v4")]
    pub family: FamilyArg,

    /// Bytes per report read [default: 4096]
    #[arg(long, default_value_t = 4096, value_parser = validate_chunk)]
    pub chunk: usize,

    /// Output format [default: text]
    #[arg(long, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Args, Debug, Clone)]
pub struct LinksArgs {
    /// Bytes per report read [default: 4096]
    #[arg(long, default_value_t = 4096, value_parser = validate_chunk)]
    pub chunk: usize,
}

#[derive(Args, Debug, Clone)]
pub struct SysctlArgs {
    /// Tunable name (autocorking_size, wmem_default, rmem_default); all if omitted
    pub name: Option<String>,

    /// New value to write
    #[arg(requires = "name")]
    pub value: Option<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FamilyArg {
    V4,
    V6,
}

impl From<FamilyArg> for Family {
    fn from(f: FamilyArg) -> Self {
        match f {
            FamilyArg::V4 => Family::V4,
            FamilyArg::V6 => Family::V6,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

fn validate_chunk(s: &str) -> Result<usize, String> {
    let val: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid integer"))?;
    if val == 0 {
        Err("chunk must be at least 1 byte".to_string())
    } else if val > 1_048_576 {
        Err("chunk must be at most 1048576 bytes".to_string())
    } else {
        Ok(val)
    }
}

fn validate_max_netns(s: &str) -> Result<usize, String> {
    let val: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid integer"))?;
    if val == 0 {
        Err("the initial namespace always exists, limit must be at least 1".to_string())
    } else {
        Ok(val)
    }
}
