use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use launchpad_process::ServerConfig;

use crate::launch::LaunchSpec;
use crate::settings::ServerLayout;

#[derive(Debug, thiserror::Error)]
pub enum MaterializeError {
    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result of the one-time bootstrap run. Every variant is acceptable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    Skipped,
    Exited(Option<i32>),
    TimedOut,
    SpawnFailed(String),
}

/// Writes `eula.txt` and `server.properties` for `config`, running the bootstrap once first.
pub async fn materialize(
    config: &ServerConfig,
    layout: &ServerLayout,
    bootstrap: &LaunchSpec,
    bootstrap_timeout: Duration,
) -> Result<BootstrapOutcome, MaterializeError> {
    tokio::fs::create_dir_all(layout.dir())
        .await
        .map_err(|source| MaterializeError::Io {
            path: layout.dir().to_path_buf(),
            source,
        })?;

    let outcome = if layout.world_dir().exists() {
        BootstrapOutcome::Skipped
    } else {
        tracing::info!(cmd = %bootstrap.display(), "generating server files");
        run_bootstrap(bootstrap, layout.dir(), bootstrap_timeout).await
    };
    match &outcome {
        BootstrapOutcome::Skipped | BootstrapOutcome::Exited(Some(0)) => {}
        other => tracing::warn!(outcome = ?other, "bootstrap run did not finish cleanly; continuing"),
    }

    write_atomic(&layout.eula_path(), b"eula=true\n").await?;
    write_atomic(&layout.properties_path(), render_properties(config).as_bytes()).await?;

    Ok(outcome)
}

async fn run_bootstrap(spec: &LaunchSpec, cwd: &Path, timeout: Duration) -> BootstrapOutcome {
    let mut cmd = spec.command(cwd);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => return BootstrapOutcome::SpawnFailed(e.to_string()),
    };

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => BootstrapOutcome::Exited(status.code()),
        Ok(Err(_)) => BootstrapOutcome::Exited(None),
        Err(_) => {
            let _ = child.kill().await;
            BootstrapOutcome::TimedOut
        }
    }
}

/// Fixed key order. The last three keys are policy and never come from `config`.
pub fn render_properties(config: &ServerConfig) -> String {
    let props: [(&str, String); 8] = [
        ("motd", escape_value(&config.motd)),
        ("gamemode", config.gamemode.as_str().to_string()),
        ("difficulty", config.difficulty.as_str().to_string()),
        ("max-players", config.max_players.to_string()),
        ("server-port", config.port.to_string()),
        ("online-mode", "false".to_string()),
        ("enable-command-block", "true".to_string()),
        ("spawn-protection", "0".to_string()),
    ];

    let mut out = String::new();
    for (k, v) in props {
        out.push_str(&format!("{k}={v}\n"));
    }
    out
}

// A raw line break would start a new key.
fn escape_value(v: &str) -> String {
    v.replace('\r', "\\r").replace('\n', "\\n")
}

async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), MaterializeError> {
    let io = |source| MaterializeError::Io {
        path: path.to_path_buf(),
        source,
    };
    let tmp = path.with_extension("tmp");
    if let Err(e) = tokio::fs::write(&tmp, data).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io(e));
    }
    tokio::fs::rename(&tmp, path).await.map_err(io)
}
