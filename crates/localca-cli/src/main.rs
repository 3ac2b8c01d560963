//! `localca`: create, inspect and trust certificates signed by a local root.

mod info;
mod make;
mod root;
mod serve;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use localca::{AuthorityConfig, CertificateAuthority, LeafKind};
use tracing_subscriber::EnvFilter;

use crate::root::RootCommand;

#[derive(Parser, Debug)]
#[command(name = "localca")]
#[command(version, about = "Local development certificate authority", long_about = None)]
struct Cli {
    /// Print verbose information to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new certificate signed with the root certificate
    Make {
        /// Create a client certificate
        #[arg(short, long)]
        client: bool,
        /// Output file; `-` for stdout, defaults to `<first name>.pem`
        #[arg(short, long)]
        out: Option<String>,
        /// Overwrite an existing output file
        #[arg(short, long)]
        force: bool,
        /// Domains, IPs, email addresses or URIs
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Print information about certificates
    Info {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Manage the root certificate
    Root {
        #[command(subcommand)]
        command: Option<RootCommand>,
    },
    /// Answer every HTTPS request with a greeting
    Serve {
        #[arg(long, default_value = serve::DEFAULT_LISTEN)]
        listen: String,
        /// PEM file holding a key and certificate; certificates are signed
        /// per host by the root when absent
        cert_file: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("localca: {error:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let config = AuthorityConfig::from_env().with_verbose(cli.verbose);
    let authority = CertificateAuthority::new(config).context("invalid configuration")?;

    match cli.command {
        Command::Make {
            client,
            out,
            force,
            names,
        } => {
            let kind = if client {
                LeafKind::Client
            } else {
                LeafKind::Server
            };
            make::run(&authority, &names, kind, out.as_deref(), force)
        }
        Command::Info { files } => info::run(&authority, &files),
        Command::Root { command } => root::run(&authority, command.unwrap_or(RootCommand::Info)),
        Command::Serve { listen, cert_file } => serve::run(authority, &listen, cert_file.as_deref()),
    }
}
