use std::collections::HashSet;
use std::fmt;
use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::root::{generate, Root};
use crate::storage::RootPaths;

use super::privilege::PrivilegeHelper;
use super::runner::{Invocation, ToolOutput, ToolRunner};

type Responder = Box<dyn Fn(&Invocation) -> ToolOutput + Send + Sync>;

/// Records every invocation and answers from a closure instead of spawning.
pub(crate) struct ScriptedRunner {
    programs: HashSet<String>,
    privileged: bool,
    responder: Responder,
    invocations: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
    pub(crate) fn new() -> Self {
        Self {
            programs: HashSet::new(),
            privileged: false,
            responder: Box::new(|_| ToolOutput {
                success: true,
                output: String::new(),
            }),
            invocations: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    pub(crate) fn with_programs(mut self, programs: &[&str]) -> Self {
        self.programs
            .extend(programs.iter().map(|program| program.to_string()));
        self
    }

    pub(crate) fn respond<F>(mut self, responder: F) -> Self
    where
        F: Fn(&Invocation) -> ToolOutput + Send + Sync + 'static,
    {
        self.responder = Box::new(responder);
        self
    }

    pub(crate) fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().clone()
    }

    pub(crate) fn rendered(&self) -> Vec<String> {
        self.invocations
            .lock()
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    /// Shared handle plus a helper that runs through it.
    pub(crate) fn into_helper(self) -> (Arc<Self>, Arc<PrivilegeHelper>) {
        let runner = Arc::new(self);
        let helper = Arc::new(PrivilegeHelper::new(runner.clone()));
        (runner, helper)
    }
}

impl fmt::Debug for ScriptedRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedRunner")
            .field("programs", &self.programs)
            .field("privileged", &self.privileged)
            .field("invocations", &self.invocations.lock().len())
            .finish()
    }
}

impl ToolRunner for ScriptedRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<ToolOutput> {
        self.invocations.lock().push(invocation.clone());
        Ok((self.responder)(invocation))
    }

    fn program_exists(&self, program: &str) -> bool {
        self.programs.contains(program)
    }

    fn is_privileged(&self) -> bool {
        self.privileged
    }
}

pub(crate) fn ok(output: impl Into<String>) -> ToolOutput {
    ToolOutput {
        success: true,
        output: output.into(),
    }
}

pub(crate) fn failed(output: impl Into<String>) -> ToolOutput {
    ToolOutput {
        success: false,
        output: output.into(),
    }
}

/// The argument following `flag`.
pub(crate) fn flag_value(invocation: &Invocation, flag: &str) -> Option<String> {
    let position = invocation.args.iter().position(|arg| arg == flag)?;
    invocation
        .args
        .get(position + 1)
        .map(|value| value.to_string_lossy().into_owned())
}

pub(crate) fn sample_root() -> Root {
    let (cert_pem, key_pem) = generate("dev@workstation").expect("generate root");
    Root::from_pem(cert_pem, key_pem, &RootPaths::in_dir("/unused")).expect("parse root")
}
