use pypack_core::{Error, Result, ToolInvocation, ToolOutput, ToolRunner};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Exit {
        output: ToolOutput,
        /// Files created (relative to the invocation cwd) before "exiting".
        creates: Vec<String>,
    },
    NotFound,
}

impl Reply {
    pub(crate) fn exit(code: i32, stdout: &str, stderr: &str) -> Self {
        Self::Exit {
            output: ToolOutput {
                status: Some(code),
                stdout: stdout.into(),
                stderr: stderr.into(),
            },
            creates: Vec::new(),
        }
    }

    pub(crate) fn ok(stdout: &str) -> Self {
        Self::exit(0, stdout, "")
    }

    pub(crate) fn creating(mut self, files: &[&str]) -> Self {
        if let Self::Exit { creates, .. } = &mut self {
            creates.extend(files.iter().map(|f| f.to_string()));
        }
        self
    }
}

/// Canned replies keyed by program name; unknown programs exit 0 silently.
#[derive(Default)]
pub(crate) struct ScriptedRunner {
    replies: HashMap<String, Reply>,
    calls: Mutex<Vec<ToolInvocation>>,
}

impl ScriptedRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on(mut self, program: &str, reply: Reply) -> Self {
        self.replies.insert(program.to_string(), reply);
        self
    }

    pub(crate) fn calls(&self) -> Vec<ToolInvocation> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn programs(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.program).collect()
    }
}

impl ToolRunner for ScriptedRunner {
    fn run(&self, inv: &ToolInvocation) -> Result<ToolOutput> {
        self.calls.lock().unwrap().push(inv.clone());
        match self.replies.get(&inv.program) {
            Some(Reply::Exit { output, creates }) => {
                for f in creates {
                    let p = inv.cwd.join(f);
                    if let Some(parent) = p.parent() {
                        std::fs::create_dir_all(parent).unwrap();
                    }
                    std::fs::write(&p, b"artifact").unwrap();
                }
                Ok(output.clone())
            }
            Some(Reply::NotFound) => Err(Error::ToolNotFound(inv.program.clone())),
            None => Ok(ToolOutput {
                status: Some(0),
                ..Default::default()
            }),
        }
    }
}
