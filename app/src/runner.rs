//! `CoreRunner` backed by the proxy-core binaries' own config check.
//!
//! sing-box: `sing-box check -c <file>`；mihomo: `mihomo -t -d <dir> -f <file>`。
//! Output of a failed check is passed back as-is.

use async_trait::async_trait;
use pf_types::ports::{CoreRunner, Verdict};
use pf_types::EngineKind;
use std::path::{Path, PathBuf};
use tokio::process::Command;

#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    pub mihomo: Option<PathBuf>,
    pub singbox: Option<PathBuf>,
}

impl ProcessRunner {
    fn binary(&self, engine: EngineKind) -> Option<&Path> {
        match engine {
            EngineKind::Mihomo => self.mihomo.as_deref(),
            EngineKind::SingBox => self.singbox.as_deref(),
        }
    }

    fn command(&self, engine: EngineKind, bin: &Path, artifact: &Path) -> Command {
        let mut cmd = Command::new(bin);
        match engine {
            EngineKind::SingBox => {
                cmd.arg("check").arg("-c").arg(artifact);
            }
            EngineKind::Mihomo => {
                let dir = artifact.parent().unwrap_or_else(|| Path::new("."));
                cmd.arg("-t").arg("-d").arg(dir).arg("-f").arg(artifact);
            }
        }
        cmd.kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl CoreRunner for ProcessRunner {
    async fn check(&self, engine: EngineKind, path: &Path) -> Verdict {
        let Some(bin) = self.binary(engine) else {
            return Verdict::Unavailable {
                reason: format!("no {engine} core configured"),
            };
        };
        let output = match self.command(engine, bin, path).output().await {
            Ok(o) => o,
            Err(e) => {
                tracing::warn!(engine = %engine, bin = %bin.display(), error = %e, "core check could not start");
                return Verdict::Unavailable {
                    reason: format!("spawn {}: {e}", bin.display()),
                };
            }
        };
        if output.status.success() {
            return Verdict::Accepted;
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = if stderr.trim().is_empty() {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        } else {
            stderr.trim().to_string()
        };
        Verdict::Rejected { message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_engine_is_unavailable() {
        let r = ProcessRunner::default();
        let v = r.check(EngineKind::SingBox, Path::new("config.json")).await;
        assert!(matches!(v, Verdict::Unavailable { .. }));
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let r = ProcessRunner {
            mihomo: Some(PathBuf::from("/nonexistent/mihomo-bin")),
            singbox: None,
        };
        let v = r.check(EngineKind::Mihomo, Path::new("config.yaml")).await;
        assert!(matches!(v, Verdict::Unavailable { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_check_is_relayed() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-core");
        std::fs::write(&script, "#!/bin/sh\necho 'bad outbound' >&2\nexit 1\n").unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let r = ProcessRunner {
            mihomo: None,
            singbox: Some(script),
        };
        let v = r.check(EngineKind::SingBox, &dir.path().join("config.json")).await;
        assert_eq!(
            v,
            Verdict::Rejected {
                message: "bad outbound".into()
            }
        );
    }
}
