use std::fs::File;
use std::io;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use localca::{CaError, CertificateAuthority, LeafKind};

/// Where `make` writes the key and certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Output {
    Stdout,
    File(PathBuf),
}

pub(crate) fn output_for(out: Option<&str>, names: &[String]) -> Result<Output> {
    match out {
        Some("-") => Ok(Output::Stdout),
        Some(path) => Ok(Output::File(PathBuf::from(path))),
        None => {
            let first = names.first().context("must give at least one name")?;
            Ok(Output::File(PathBuf::from(format!("{}.pem", safe_path(first)))))
        }
    }
}

/// Strip `..`, path separators and NUL so a name can't escape the current directory.
pub(crate) fn safe_path(name: &str) -> String {
    let mut current = name.to_string();
    loop {
        let next = current
            .replace("..", "")
            .replace(['/', '\\', '\0'], "");
        if next == current {
            return next;
        }
        current = next;
    }
}

pub(crate) fn run(
    authority: &CertificateAuthority,
    names: &[String],
    kind: LeafKind,
    out: Option<&str>,
    force: bool,
) -> Result<()> {
    match output_for(out, names)? {
        Output::Stdout => {
            let mut stdout = io::stdout().lock();
            authority
                .write_leaf(&mut stdout, names, kind)
                .map_err(with_root_hint)?;
        }
        Output::File(path) => {
            if path.exists() && !force {
                bail!("{:?} already exists; use -f to overwrite", path.display().to_string());
            }
            let leaf = authority.issue(names, kind).map_err(with_root_hint)?;
            let mut file =
                File::create(&path).with_context(|| format!("create {}", path.display()))?;
            leaf.write_pem(&mut file)
                .with_context(|| format!("write {}", path.display()))?;
            eprintln!("wrote certificate and key to {}", path.display());
        }
    }
    Ok(())
}

fn with_root_hint(error: CaError) -> anyhow::Error {
    match error {
        CaError::NotReady(_) => {
            anyhow::Error::new(error).context("no root certificate; run `localca root create` first")
        }
        other => anyhow::Error::new(other),
    }
}
