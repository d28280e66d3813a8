use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use crate::launch::LaunchSpec;

pub const JAR_FILE_NAME: &str = "fabric-server.jar";
pub const DEFAULT_JAR_URL: &str =
    "https://meta.fabricmc.net/v2/versions/loader/1.21/0.16.0/1.1.0/server/jar";
pub const DEFAULT_STOP_COMMAND: &str = "stop";

const DEFAULT_XMX_MB: u64 = 2048;
const DEFAULT_XMS_MB: u64 = 1024;
const DEFAULT_STOP_TIMEOUT_SEC: u64 = 30;
const DEFAULT_BOOTSTRAP_TIMEOUT_SEC: u64 = 30;
const DEFAULT_LOG_MAX_LINES: usize = 1000;

/// On-disk layout of the server directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerLayout {
    dir: PathBuf,
}

impl ServerLayout {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn jar_path(&self) -> PathBuf {
        self.dir.join(JAR_FILE_NAME)
    }

    pub fn properties_path(&self) -> PathBuf {
        self.dir.join("server.properties")
    }

    pub fn eula_path(&self) -> PathBuf {
        self.dir.join("eula.txt")
    }

    /// Only checked for existence: its presence means the bootstrap run already happened.
    pub fn world_dir(&self) -> PathBuf {
        self.dir.join("world")
    }
}

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub layout: ServerLayout,
    pub jar_url: String,
    pub launch: LaunchSpec,
    pub bootstrap: LaunchSpec,
    pub stop_command: String,
    pub stop_timeout: Duration,
    pub bootstrap_timeout: Duration,
    pub log_max_lines: usize,
}

impl AgentSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let get_u64 = |key: &str| get(key).and_then(|v| v.parse::<u64>().ok());

        let server_dir = absolutize(PathBuf::from(
            get("LAUNCHPAD_SERVER_DIR").unwrap_or_else(|| "./server".to_string()),
        ));
        let java = get("LAUNCHPAD_JAVA").unwrap_or_else(|| "java".to_string());
        let xmx_mb = get_u64("LAUNCHPAD_XMX_MB")
            .map(|v| v.clamp(256, 65536))
            .unwrap_or(DEFAULT_XMX_MB);
        // -Xms above -Xmx makes the JVM refuse to start.
        let xms_mb = get_u64("LAUNCHPAD_XMS_MB")
            .map(|v| v.clamp(256, 65536))
            .unwrap_or(DEFAULT_XMS_MB)
            .min(xmx_mb);

        Self {
            layout: ServerLayout::new(server_dir),
            jar_url: get("LAUNCHPAD_JAR_URL").unwrap_or_else(|| DEFAULT_JAR_URL.to_string()),
            launch: LaunchSpec::server(&java, JAR_FILE_NAME, xmx_mb, xms_mb),
            bootstrap: LaunchSpec::bootstrap(&java, JAR_FILE_NAME),
            stop_command: DEFAULT_STOP_COMMAND.to_string(),
            stop_timeout: Duration::from_secs(
                get_u64("LAUNCHPAD_STOP_TIMEOUT_SEC")
                    .map(|v| v.clamp(1, 600))
                    .unwrap_or(DEFAULT_STOP_TIMEOUT_SEC),
            ),
            bootstrap_timeout: Duration::from_secs(
                get_u64("LAUNCHPAD_BOOTSTRAP_TIMEOUT_SEC")
                    .map(|v| v.clamp(1, 600))
                    .unwrap_or(DEFAULT_BOOTSTRAP_TIMEOUT_SEC),
            ),
            log_max_lines: get("LAUNCHPAD_LOG_MAX_LINES")
                .and_then(|v| v.parse::<usize>().ok())
                .map(|v| v.clamp(100, 50_000))
                .unwrap_or(DEFAULT_LOG_MAX_LINES),
        }
    }
}

fn absolutize(p: PathBuf) -> PathBuf {
    if p.is_absolute() {
        return p;
    }
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(p)
}
