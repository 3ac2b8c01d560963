use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::runner::{Invocation, SystemRunner, ToolOutput, ToolRunner};

const SUDO_PREFIX: &[&str] = &["--prompt=Sudo password:", "--"];
const DOAS_PREFIX: &[&str] = &["--"];

/// Runs trust store tools, escalating through `sudo` or `doas` when needed.
#[derive(Debug)]
pub struct PrivilegeHelper {
    runner: Arc<dyn ToolRunner>,
    warned: AtomicBool,
}

impl PrivilegeHelper {
    pub fn new(runner: Arc<dyn ToolRunner>) -> Self {
        Self {
            runner,
            warned: AtomicBool::new(false),
        }
    }

    pub fn system() -> Self {
        Self::new(Arc::new(SystemRunner))
    }

    pub fn runner(&self) -> &dyn ToolRunner {
        self.runner.as_ref()
    }

    /// The invocation to run for elevated access: unchanged when already
    /// privileged, otherwise wrapped in `sudo` or `doas`. With neither
    /// available a single warning is logged per helper and the command runs as is.
    pub fn escalate(&self, invocation: &Invocation) -> Invocation {
        if self.runner.is_privileged() {
            return invocation.clone();
        }
        if self.runner.program_exists("sudo") {
            return invocation.wrapped_in("sudo", SUDO_PREFIX);
        }
        if self.runner.program_exists("doas") {
            return invocation.wrapped_in("doas", DOAS_PREFIX);
        }
        if !self.warned.swap(true, Ordering::SeqCst) {
            tracing::warn!(
                "sudo or doas not available and not running as root; the (un)install might fail"
            );
        }
        invocation.clone()
    }

    pub fn has_warned(&self) -> bool {
        self.warned.load(Ordering::SeqCst)
    }

    pub fn run(&self, invocation: &Invocation) -> io::Result<ToolOutput> {
        tracing::debug!(command = %invocation, "running trust store tool");
        self.runner.run(invocation)
    }

    pub fn run_escalated(&self, invocation: &Invocation) -> io::Result<ToolOutput> {
        self.run(&self.escalate(invocation))
    }

    /// Run directly; on failure whose output contains `denied_marker`, retry once
    /// escalated. The retry only happens on Unix.
    pub fn run_with_retry(
        &self,
        invocation: &Invocation,
        denied_marker: &str,
    ) -> io::Result<ToolOutput> {
        let output = self.run(invocation)?;
        if output.success || !output.contains(denied_marker) || !cfg!(unix) {
            return Ok(output);
        }
        tracing::debug!(
            tool = %invocation.program_name(),
            marker = denied_marker,
            "retrying with elevated privileges"
        );
        self.run_escalated(invocation)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::PrivilegeHelper;
    use crate::truststore::runner::{Invocation, ToolOutput};
    use crate::truststore::testing::ScriptedRunner;

    #[test]
    fn privileged_process_runs_directly() {
        let runner = Arc::new(ScriptedRunner::new().privileged(true).with_programs(&["sudo"]));
        let helper = PrivilegeHelper::new(runner);
        let escalated = helper.escalate(&Invocation::new("tee").arg("/etc/anchor.pem"));
        assert_eq!(escalated.to_string(), "tee /etc/anchor.pem");
    }

    #[test]
    fn sudo_is_preferred_over_doas() {
        let runner = Arc::new(ScriptedRunner::new().with_programs(&["sudo", "doas"]));
        let helper = PrivilegeHelper::new(runner);
        let escalated = helper.escalate(&Invocation::new("rm").args(["-f", "/tmp/a"]));
        assert_eq!(
            escalated.to_string(),
            "sudo --prompt=Sudo password: -- rm -f /tmp/a"
        );

        let runner = Arc::new(ScriptedRunner::new().with_programs(&["doas"]));
        let helper = PrivilegeHelper::new(runner);
        let escalated = helper.escalate(&Invocation::new("rm").args(["-f", "/tmp/a"]));
        assert_eq!(escalated.to_string(), "doas -- rm -f /tmp/a");
    }

    #[test]
    fn missing_escalation_tools_warn_once_per_helper() {
        let helper = PrivilegeHelper::new(Arc::new(ScriptedRunner::new()));
        assert!(!helper.has_warned());
        let first = helper.escalate(&Invocation::new("update-ca-certificates"));
        let second = helper.escalate(&Invocation::new("update-ca-certificates"));
        assert_eq!(first, second);
        assert!(helper.has_warned());

        let fresh = PrivilegeHelper::new(Arc::new(ScriptedRunner::new()));
        assert!(!fresh.has_warned());
    }

    #[cfg(unix)]
    #[test]
    fn retry_escalates_only_on_marker() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .with_programs(&["sudo"])
                .respond(|invocation| {
                    if invocation.program_name() == "sudo" {
                        return ToolOutput {
                            success: true,
                            output: String::new(),
                        };
                    }
                    ToolOutput {
                        success: false,
                        output: "certutil: SEC_ERROR_READ_ONLY".to_string(),
                    }
                }),
        );
        let helper = PrivilegeHelper::new(runner.clone());

        let output = helper
            .run_with_retry(&Invocation::new("certutil").arg("-A"), "SEC_ERROR_READ_ONLY")
            .expect("run");
        assert!(output.success);
        assert_eq!(runner.invocations().len(), 2);

        let output = helper
            .run_with_retry(&Invocation::new("certutil").arg("-A"), "SOMETHING_ELSE")
            .expect("run");
        assert!(!output.success);
        assert_eq!(runner.invocations().len(), 3);
    }
}
