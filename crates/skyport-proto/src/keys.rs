//! Generated key material

use serde::{Deserialize, Serialize};
use std::fmt;

/// What a keypair is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    /// SSH host identity injected into the remote host at boot
    HostKey,
    /// SSH client identity used for remote command execution
    ClientKey,
    /// Point-to-point link identity (x25519)
    LinkKey,
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KeyKind::HostKey => "host",
            KeyKind::ClientKey => "client",
            KeyKind::LinkKey => "link",
        };
        f.write_str(s)
    }
}

/// Private and public key material
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keypair {
    pub kind: KeyKind,
    pub label: String,
    pub private: String,
    pub public: String,
}

impl Keypair {
    /// Build a keypair, trimming the public half.
    ///
    /// SSH private keys must keep their trailing newline or OpenSSH refuses
    /// to load them, so only link keys get their private half trimmed.
    pub fn new(kind: KeyKind, label: &str, private: String, public: String) -> Self {
        let private = match kind {
            KeyKind::LinkKey => private.trim().to_string(),
            KeyKind::HostKey | KeyKind::ClientKey => {
                let mut private = private.trim_end().to_string();
                private.push('\n');
                private
            }
        };
        Self {
            kind,
            label: label.to_string(),
            private,
            public: public.trim().to_string(),
        }
    }
}

// Private material stays out of logs.
impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("kind", &self.kind)
            .field("label", &self.label)
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}
