use std::ffi::OsString;

use clap::{error::ErrorKind, Parser};

use stable_ipam::{
    commands::{self, add, check, del, version, CmdArgs, Command},
    error::{PluginError, PluginResult},
    ipam::delegate::ExecDelegate,
    network::{constants, route::NetlinkHost},
};

#[derive(Parser, Debug)]
#[clap(version = env!("CARGO_PKG_VERSION"), about)]
struct Opts {
    /// Instead of reading from STDIN, read the network configuration from the given file.
    #[clap(short, long)]
    file: Option<OsString>,
    /// CNI command to run, one of ADD, DEL, CHECK or VERSION
    #[clap(long, env = "CNI_COMMAND", default_value = "")]
    command: String,
    #[clap(flatten)]
    cmd_args: CmdArgs,
}

/// Run the command, returns what has to be printed on stdout.
fn run(command: Command, args: &CmdArgs) -> PluginResult<Option<String>> {
    let ipam = ExecDelegate;
    let output = match command {
        Command::Add => {
            let mut host = NetlinkHost::new()?;
            let result = add::exec(args, &mut host, &ipam)?;
            Some(serde_json::to_string(&result)?)
        }
        Command::Del => {
            let mut host = NetlinkHost::new()?;
            del::exec(args, &mut host, &ipam)?;
            None
        }
        Command::Check => {
            let mut host = NetlinkHost::new()?;
            check::exec(args, &mut host, &ipam)?;
            None
        }
        Command::Version => Some(serde_json::to_string(&version::exec())?),
    };
    Ok(output)
}

fn fail(err: PluginError, cni_version: &str) -> ! {
    err.print_json(cni_version);
    std::process::exit(err.get_exit_code());
}

fn main() {
    env_logger::builder().format_timestamp(None).init();

    let opts = match Opts::try_parse() {
        Ok(opts) => opts,
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => err.exit(),
            _ => fail(
                PluginError::args(err.to_string()),
                constants::CURRENT_CNI_VERSION,
            ),
        },
    };

    let command = match opts.command.parse::<Command>() {
        Ok(command) => command,
        Err(err) => fail(err, constants::CURRENT_CNI_VERSION),
    };

    let mut args = opts.cmd_args;
    // VERSION does not need a config
    if command != Command::Version {
        args.stdin_data = match commands::read_config(opts.file) {
            Ok(data) => data,
            Err(err) => fail(err, constants::CURRENT_CNI_VERSION),
        };
    }

    match run(command, &args) {
        Ok(Some(out)) => println!("{out}"),
        Ok(None) => {}
        Err(err) => fail(err, &commands::probe_cni_version(&args.stdin_data)),
    }
}
