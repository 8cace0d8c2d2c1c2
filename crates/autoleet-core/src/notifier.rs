//! Success notification: clipboard copy plus an audible/desktop notice.
//!
//! Best-effort. Missing tools are logged and skipped.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::NotifyConfig;
use crate::extract::CandidateScript;

/// Told about every script that passed.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_success(&self, script: &CandidateScript, path: &Path);
}

/// Discards notifications.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify_success(&self, _script: &CandidateScript, _path: &Path) {}
}

/// Clipboard and sound via platform command-line tools.
#[derive(Debug, Clone)]
pub struct DesktopNotifier {
    config: NotifyConfig,
}

impl DesktopNotifier {
    pub fn new(config: NotifyConfig) -> Self {
        Self { config }
    }

    /// Candidate clipboard writers for this platform, in preference order.
    fn clipboard_commands() -> &'static [&'static [&'static str]] {
        if cfg!(target_os = "macos") {
            &[&["pbcopy"]]
        } else if cfg!(windows) {
            &[&["clip"]]
        } else {
            &[
                &["wl-copy"],
                &["xclip", "-selection", "clipboard"],
                &["xsel", "--clipboard", "--input"],
            ]
        }
    }

    async fn copy_to_clipboard(&self, text: &str) -> bool {
        for argv in Self::clipboard_commands() {
            match pipe_into(argv, text).await {
                Ok(true) => return true,
                Ok(false) => debug!(tool = argv[0], "clipboard tool failed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => debug!(tool = argv[0], error = %e, "clipboard tool failed"),
            }
        }
        false
    }

    async fn announce(&self, title: &str) {
        let message = format!("Solution ready: {title}");
        let argv: Vec<String> = if cfg!(target_os = "macos") {
            vec!["say".into(), "Code ready".into()]
        } else if cfg!(windows) {
            return;
        } else {
            vec!["notify-send".into(), "AutoLeet".into(), message]
        };
        let status = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = status {
            debug!(tool = %argv[0], error = %e, "notification tool unavailable");
        }
    }
}

#[async_trait]
impl Notifier for DesktopNotifier {
    async fn notify_success(&self, script: &CandidateScript, path: &Path) {
        if self.config.clipboard {
            if self.copy_to_clipboard(&script.code).await {
                info!(path = %path.display(), "solution copied to clipboard");
            } else {
                warn!("no clipboard tool available; solution not copied");
            }
        }
        if self.config.sound {
            self.announce(script.display_title()).await;
        }
    }
}

/// Run `argv` with `text` on stdin. `Ok(false)` when it exits nonzero.
async fn pipe_into(argv: &[&str], text: &str) -> std::io::Result<bool> {
    let mut child = Command::new(argv[0])
        .args(&argv[1..])
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(text.as_bytes()).await?;
        stdin.shutdown().await?;
    }
    Ok(child.wait().await?.success())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_notifier_does_nothing() {
        let notifier = DesktopNotifier::new(NotifyConfig {
            clipboard: false,
            sound: false,
        });
        notifier
            .notify_success(&CandidateScript::new(None, "x"), Path::new("x.py"))
            .await;
        NoopNotifier
            .notify_success(&CandidateScript::new(None, "x"), Path::new("x.py"))
            .await;
    }

    #[tokio::test]
    async fn missing_tool_is_not_found() {
        let err = pipe_into(&["definitely-not-a-clipboard-tool"], "x")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn pipe_reports_exit_status() {
        assert!(pipe_into(&["cat"], "hello").await.unwrap());
        assert!(!pipe_into(&["sh", "-c", "cat >/dev/null; exit 3"], "hello")
            .await
            .unwrap());
    }

    #[test]
    fn clipboard_candidates_exist() {
        assert!(!DesktopNotifier::clipboard_commands().is_empty());
    }
}
