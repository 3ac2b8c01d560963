use std::env;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// One external tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub env: Vec<(OsString, OsString)>,
    pub stdin: Option<Vec<u8>>,
}

impl Invocation {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, input: Vec<u8>) -> Self {
        self.stdin = Some(input);
        self
    }

    /// `wrapper <prefix...> <program> <args...>`, keeping env and stdin.
    pub(crate) fn wrapped_in(&self, wrapper: &str, prefix: &[&str]) -> Self {
        let mut args: Vec<OsString> = prefix.iter().map(OsString::from).collect();
        args.push(self.program.clone());
        args.extend(self.args.iter().cloned());
        Self {
            program: OsString::from(wrapper),
            args,
            env: self.env.clone(),
            stdin: self.stdin.clone(),
        }
    }

    pub fn program_name(&self) -> String {
        Path::new(&self.program)
            .file_name()
            .unwrap_or(self.program.as_os_str())
            .to_string_lossy()
            .into_owned()
    }

    pub fn has_arg(&self, arg: impl AsRef<OsStr>) -> bool {
        self.args.iter().any(|candidate| candidate == arg.as_ref())
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Exit status and interleaved stdout/stderr of a finished tool.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ToolOutput {
    pub success: bool,
    pub output: String,
}

impl ToolOutput {
    pub fn contains(&self, marker: &str) -> bool {
        self.output.contains(marker)
    }
}

/// Executes external tools for the trust store backends.
pub trait ToolRunner: fmt::Debug + Send + Sync {
    fn run(&self, invocation: &Invocation) -> io::Result<ToolOutput>;

    /// Whether `program` resolves on `PATH`.
    fn program_exists(&self, program: &str) -> bool;

    /// Whether the current process already runs with administrative rights.
    fn is_privileged(&self) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl ToolRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<ToolOutput> {
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(key, value)| (key, value)))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = match &invocation.stdin {
            None => command.stdin(Stdio::null()).output()?,
            Some(input) => {
                let mut child = command.stdin(Stdio::piped()).spawn()?;
                if let Some(mut pipe) = child.stdin.take() {
                    pipe.write_all(input)?;
                }
                child.wait_with_output()?
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(ToolOutput {
            success: output.status.success(),
            output: combined,
        })
    }

    fn program_exists(&self, program: &str) -> bool {
        find_on_path(program).is_some()
    }

    #[cfg(unix)]
    fn is_privileged(&self) -> bool {
        nix::unistd::geteuid().is_root()
    }

    #[cfg(not(unix))]
    fn is_privileged(&self) -> bool {
        false
    }
}

fn find_on_path(program: &str) -> Option<PathBuf> {
    let search = env::var_os("PATH")?;
    env::split_paths(&search).find_map(|dir| {
        let candidate = dir.join(program);
        if candidate.is_file() {
            return Some(candidate);
        }
        if cfg!(windows) {
            let with_exe = dir.join(format!("{program}.exe"));
            if with_exe.is_file() {
                return Some(with_exe);
            }
        }
        None
    })
}

#[cfg(test)]
mod tests {
    use super::{Invocation, SystemRunner, ToolRunner};

    #[test]
    fn wrapping_prefixes_program_and_keeps_env() {
        let invocation = Invocation::new("/usr/bin/keytool")
            .args(["-list", "-storepass", "changeit"])
            .env("JAVA_HOME", "/opt/jdk");
        let wrapped = invocation.wrapped_in("sudo", &["--prompt=Sudo password:", "--"]);

        assert_eq!(
            wrapped.to_string(),
            "sudo --prompt=Sudo password: -- /usr/bin/keytool -list -storepass changeit"
        );
        assert_eq!(wrapped.env, invocation.env);
        assert_eq!(invocation.program_name(), "keytool");
    }

    #[cfg(unix)]
    #[test]
    fn system_runner_captures_output_and_feeds_stdin() {
        let runner = SystemRunner;
        let output = runner
            .run(&Invocation::new("cat").stdin(b"hello anchors".to_vec()))
            .expect("run cat");
        assert!(output.success);
        assert_eq!(output.output, "hello anchors");

        let failed = runner
            .run(&Invocation::new("sh").args(["-c", "echo denied >&2; exit 3"]))
            .expect("run sh");
        assert!(!failed.success);
        assert!(failed.contains("denied"));
        assert!(runner.program_exists("sh"));
        assert!(!runner.program_exists("definitely-not-a-localca-tool"));
    }
}
