//! Command authentication seam
//!
//! Tag verification (HMAC or otherwise) is owned by an external
//! collaborator; the server only asks it yes or no.

use crate::net::protocol::{ClientCommand, ClientEnvelope};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authentication tag")]
    MissingTag,
    #[error("Authentication tag rejected")]
    Rejected,
}

pub trait CommandAuthenticator: Send + Sync {
    fn verify(&self, tag: &[u8], command: &ClientCommand) -> bool;
}

/// Accepts any command that carries a tag
#[derive(Debug, Default, Clone, Copy)]
pub struct TagPresence;

impl CommandAuthenticator for TagPresence {
    fn verify(&self, tag: &[u8], _command: &ClientCommand) -> bool {
        !tag.is_empty()
    }
}

/// Pings bypass authentication; everything else must verify
pub fn authorize(auth: &dyn CommandAuthenticator, envelope: &ClientEnvelope) -> Result<(), AuthError> {
    if !envelope.command.requires_auth() {
        return Ok(());
    }
    if envelope.auth_tag.is_empty() {
        return Err(AuthError::MissingTag);
    }
    if auth.verify(&envelope.auth_tag, &envelope.command) {
        Ok(())
    } else {
        Err(AuthError::Rejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DenyAll;

    impl CommandAuthenticator for DenyAll {
        fn verify(&self, _tag: &[u8], _command: &ClientCommand) -> bool {
            false
        }
    }

    fn envelope(tag: &[u8], command: ClientCommand) -> ClientEnvelope {
        ClientEnvelope {
            auth_tag: tag.to_vec(),
            command,
        }
    }

    #[test]
    fn test_ping_bypasses_auth() {
        assert!(authorize(&DenyAll, &envelope(&[], ClientCommand::Ping)).is_ok());
    }

    #[test]
    fn test_tag_required() {
        let info = || ClientCommand::GetServerInfo;
        assert_eq!(
            authorize(&TagPresence, &envelope(&[], info())),
            Err(AuthError::MissingTag)
        );
        assert!(authorize(&TagPresence, &envelope(&[1, 2], info())).is_ok());
        assert_eq!(
            authorize(&DenyAll, &envelope(&[1, 2], info())),
            Err(AuthError::Rejected)
        );
    }
}
