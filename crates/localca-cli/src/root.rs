use std::env;
use std::io::{self, Write};

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use localca::{CertificateAuthority, ENV_CAROOT};

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RootCommand {
    /// Show the storage location, environment and root details
    Info,
    /// Create a new root certificate
    Create {
        /// Replace an existing root certificate
        #[arg(short, long)]
        force: bool,
    },
    /// Remove the root certificate
    Remove,
    /// Install the root into every supported trust store, creating it first if needed
    Install,
    /// Uninstall the root from every supported trust store
    Uninstall,
}

pub(crate) fn run(authority: &CertificateAuthority, command: RootCommand) -> Result<()> {
    match command {
        RootCommand::Info => {
            let mut stdout = io::stdout().lock();
            describe(authority, &mut stdout)?;
            if authority.exists() {
                describe_trust(authority, &mut stdout)?;
            }
            Ok(())
        }
        RootCommand::Create { force } => {
            if force {
                authority.delete().context("remove existing root")?;
            }
            let root = authority.create().context("create root")?;
            println!("Created root certificate {}", root.subject());
            Ok(())
        }
        RootCommand::Remove => authority.delete().context("remove root"),
        RootCommand::Install => {
            if !authority.exists() {
                authority.create().context("create root")?;
            }
            authority
                .install_trust()
                .context("install root into trust stores")
        }
        RootCommand::Uninstall => {
            if !authority.exists() {
                bail!("root certificate doesn't exist");
            }
            authority
                .uninstall_trust()
                .context("uninstall root from trust stores")
        }
    }
}

/// Storage paths, environment and, when present, the root's details.
pub(crate) fn describe<W: Write + ?Sized>(
    authority: &CertificateAuthority,
    out: &mut W,
) -> Result<()> {
    writeln!(out, "Root storage location:")?;
    match authority.paths() {
        Ok(paths) => {
            writeln!(out, "\t{}", paths.cert.display())?;
            writeln!(out, "\t{}", paths.key.display())?;
        }
        Err(error) => writeln!(out, "\t{error}")?,
    }
    writeln!(out)?;

    let caroot = env::var(ENV_CAROOT).unwrap_or_else(|_| "(not set)".to_string());
    writeln!(out, "Environment:")?;
    writeln!(out, "\t{ENV_CAROOT}={caroot}")?;
    writeln!(out)?;

    if !authority.exists() {
        writeln!(out, "No root certificate exists")?;
        return Ok(());
    }

    let root = authority.root().context("load root")?;
    writeln!(out, "Root certificate:")?;
    writeln!(out, "\tSubject:    {}", root.subject())?;
    writeln!(out, "\tValid:      {} to {}", root.not_before(), root.not_after())?;
    writeln!(out, "\tSerial:     {}", root.serial_decimal())?;
    writeln!(out, "\tAlgorithm:  ecdsa-with-SHA256")?;
    writeln!(out, "\tSHA-256:    {}", root.sha256_fingerprint())?;
    Ok(())
}

fn describe_trust<W: Write + ?Sized>(authority: &CertificateAuthority, out: &mut W) -> Result<()> {
    let root = authority.root().context("load root")?;
    let stores = authority.trust_stores();
    writeln!(out)?;
    writeln!(out, "Trust stores:")?;
    if stores.is_empty() {
        writeln!(out, "\t(none found)")?;
    }
    for (name, installed) in stores.presence(&root) {
        let state = if installed { "installed" } else { "not installed" };
        writeln!(out, "\t{name:<16}{state}")?;
    }
    Ok(())
}
