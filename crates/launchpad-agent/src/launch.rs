use std::path::Path;

use tokio::process::Command;

/// Executable plus arguments, resolved relative to the server directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub exec: String,
    pub args: Vec<String>,
}

impl LaunchSpec {
    pub fn new(exec: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            exec: exec.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Long-running server with fixed heap bounds.
    pub fn server(java: &str, jar: &str, xmx_mb: u64, xms_mb: u64) -> Self {
        Self::new(
            java,
            [
                format!("-Xmx{xmx_mb}M"),
                format!("-Xms{xms_mb}M"),
                "-jar".to_string(),
                jar.to_string(),
                "nogui".to_string(),
            ],
        )
    }

    /// First run that only generates the default files, then exits.
    pub fn bootstrap(java: &str, jar: &str) -> Self {
        Self::new(java, ["-jar", jar, "nogui"])
    }

    pub fn command(&self, cwd: &Path) -> Command {
        let mut cmd = Command::new(&self.exec);
        cmd.args(&self.args).current_dir(cwd);
        cmd
    }

    pub fn display(&self) -> String {
        if self.args.is_empty() {
            return self.exec.clone();
        }
        format!("{} {}", self.exec, self.args.join(" "))
    }
}
