//! Controller CLI for a running sprof-instrumented process.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Section Profiler Control (sprofctl)
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// PID of the instrumented process
    #[clap(short, long)]
    pid: Option<u32>,

    /// Explicit control socket path (overrides --pid)
    #[clap(short, long, value_name = "PATH")]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the current profiling flags
    State,
    /// Turn profiling on and route reports to the report file
    Enable,
    /// Turn profiling off and clear all report sinks
    Disable,
    /// Write a report immediately
    Save,
}

impl Commands {
    fn wire_name(&self) -> &'static str {
        match self {
            Commands::State => "state",
            Commands::Enable => "enable",
            Commands::Disable => "disable",
            Commands::Save => "save",
        }
    }
}

#[cfg(unix)]
fn main() {
    use colored::*;
    use sprof::control::{send_command, socket_path_for_pid, INVALID_COMMAND};
    use std::process::exit;

    let args = Args::parse();

    let path = match (args.socket, args.pid) {
        (Some(path), _) => path,
        (None, Some(pid)) => socket_path_for_pid(pid),
        (None, None) => {
            eprintln!("Error: either --pid or --socket is required");
            exit(1);
        }
    };

    match send_command(&path, args.command.wire_name()) {
        Ok(reply) => {
            if reply == INVALID_COMMAND {
                println!("{}", reply.red());
                exit(1);
            }
            println!("{}", reply.green());
        }
        Err(err) => {
            eprintln!(
                "Error talking to {}: {}",
                path.display().to_string().cyan(),
                err
            );
            exit(1);
        }
    }
}

#[cfg(not(unix))]
fn main() {
    eprintln!("sprofctl requires a Unix platform (the control channel is a Unix domain socket)");
    std::process::exit(1);
}
