//! Key generation by shelling out to `ssh-keygen` and `wg`

use crate::error::CloudError;
use async_trait::async_trait;
use skyport_proto::{KeyKind, Keypair, KeypairGenerator, ProviderError};
use std::process::Stdio;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Generates ed25519 SSH keys with `ssh-keygen` and x25519 link keys with
/// `wg genkey` / `wg pubkey`
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandKeypairGenerator;

impl CommandKeypairGenerator {
    pub fn new() -> Self {
        Self
    }

    async fn ssh_keypair(&self, kind: KeyKind, label: &str) -> Result<Keypair, CloudError> {
        let dir = TempDir::new()?;
        let path = dir.path().join("id_ed25519");

        let output = Command::new("ssh-keygen")
            .args(["-t", "ed25519", "-q", "-N", "", "-C"])
            .arg(label)
            .arg("-f")
            .arg(&path)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| key_tool("ssh-keygen", e.to_string()))?;
        if !output.status.success() {
            return Err(key_tool(
                "ssh-keygen",
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let private = tokio::fs::read_to_string(&path).await?;
        let public = tokio::fs::read_to_string(path.with_extension("pub")).await?;
        debug!(kind = %kind, label, "Generated ssh keypair");
        Ok(Keypair::new(kind, label, private, public))
    }

    async fn link_keypair(&self, label: &str) -> Result<Keypair, CloudError> {
        let output = Command::new("wg")
            .arg("genkey")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| key_tool("wg genkey", e.to_string()))?;
        if !output.status.success() {
            return Err(key_tool(
                "wg genkey",
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        let private = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let public = derive_public_key(&private).await?;

        debug!(label, "Generated link keypair");
        Ok(Keypair::new(KeyKind::LinkKey, label, private, public))
    }
}

/// Pipe a private key through `wg pubkey`
async fn derive_public_key(private: &str) -> Result<String, CloudError> {
    let mut child = Command::new("wg")
        .arg("pubkey")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| key_tool("wg pubkey", e.to_string()))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| key_tool("wg pubkey", "stdin unavailable".to_string()))?;
    stdin.write_all(private.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    drop(stdin);

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        return Err(key_tool(
            "wg pubkey",
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn key_tool(command: &str, message: String) -> CloudError {
    CloudError::KeyTool {
        command: command.to_string(),
        message,
    }
}

#[async_trait]
impl KeypairGenerator for CommandKeypairGenerator {
    async fn generate(&self, kind: KeyKind, label: &str) -> Result<Keypair, ProviderError> {
        let keypair = match kind {
            KeyKind::HostKey | KeyKind::ClientKey => self.ssh_keypair(kind, label).await?,
            KeyKind::LinkKey => self.link_keypair(label).await?,
        };
        Ok(keypair)
    }
}
