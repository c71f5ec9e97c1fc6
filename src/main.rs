use std::io::{self, Write};

use clap::Parser;

use smcstat::cli::{Cli, Command, OutputFormat, SysctlArgs};
use smcstat::config::StateFile;
use smcstat::error::SmcError;
use smcstat::model::{ConnectionRecord, Family, NetNsId};
use smcstat::output::json;
use smcstat::state::SmcNet;
use smcstat::sysctl::Tunable;

fn exit_code(err: &SmcError) -> i32 {
    match err {
        SmcError::Config(_)
        | SmcError::Io(_)
        | SmcError::UnknownTunable(_)
        | SmcError::InvalidValue { .. }
        | SmcError::BelowMinimum { .. }
        | SmcError::LinkGroupExists(_)
        | SmcError::UnknownLinkGroup(_)
        | SmcError::InvalidLinkIndex(_) => 1,
        SmcError::UnknownNamespace(_)
        | SmcError::NamespaceExists(_)
        | SmcError::ResourceExhausted(_) => 2,
        _ => 4,
    }
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(exit_code(&e));
        }
    }
}

fn run(cli: Cli) -> Result<(), SmcError> {
    let mut net = SmcNet::new();
    if let Some(max) = cli.max_netns {
        net = net.with_namespace_limit(max);
    }
    if let Some(path) = &cli.state {
        StateFile::from_path(path)?.apply(&net)?;
    } else {
        log::info!("no --state given, reporting an empty system");
    }

    let netns = NetNsId(cli.netns);
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        Command::Conns(args) => {
            let family = Family::from(args.family);
            match args.format {
                OutputFormat::Text => {
                    let mut reader = net.conn_report(netns, family)?;
                    loop {
                        let part = reader.read(args.chunk);
                        if part.is_empty() {
                            break;
                        }
                        out.write_all(part.as_bytes()).map_err(SmcError::Io)?;
                    }
                }
                OutputFormat::Json => {
                    net.namespace(netns)?;
                    let rows = json::collect_rows(
                        net.table(family),
                        Box::new(move |r: &ConnectionRecord| r.netns() == netns),
                    );
                    json::write_json(&rows, &mut out)?;
                }
            }
        }
        Command::Links(args) => {
            let mut reader = net.link_report(netns)?;
            loop {
                let part = reader.read(args.chunk);
                if part.is_empty() {
                    break;
                }
                out.write_all(part.as_bytes()).map_err(SmcError::Io)?;
            }
        }
        Command::Sysctl(args) => sysctl(&net, netns, args, &mut out)?,
    }

    out.flush().map_err(SmcError::Io)
}

fn sysctl(
    net: &SmcNet,
    netns: NetNsId,
    args: SysctlArgs,
    out: &mut impl Write,
) -> Result<(), SmcError> {
    let ns = net.namespace(netns)?;
    let tunables = ns.tunables();
    match (args.name, args.value) {
        (None, _) => {
            for t in Tunable::ALL {
                writeln!(out, "net.smc.{} = {}", t.name(), tunables.read(t.name())?)
                    .map_err(SmcError::Io)?;
            }
        }
        (Some(name), None) => {
            writeln!(out, "{}", tunables.read(&name)?).map_err(SmcError::Io)?;
        }
        (Some(name), Some(value)) => {
            tunables.write(&name, &value)?;
            writeln!(out, "net.smc.{} = {}", name, tunables.read(&name)?)
                .map_err(SmcError::Io)?;
        }
    }
    Ok(())
}
