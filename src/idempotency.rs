//! Idempotency key derivation
//!
//! The request identity is fingerprinted as
//! `HMAC-SHA256(secret, "{action}|{source}|{source_idempk}")`, with
//! `"|{update_idempk}"` appended for update actions. Keying the hash keeps
//! raw client identifiers out of the index keyspace, and the HMAC secret ties
//! a data directory to a deployment: changing it invalidates duplicate
//! detection for everything already stored.
//!
//! The digest is hex-encoded because it becomes part of a UTF-8 store key.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::entities::command::CommandAction;

type HmacSha256 = Hmac<Sha256>;

/// Hex digest of the idempotency fingerprint for one command identity.
pub fn derive_key_hash(
    secret: &[u8],
    action: CommandAction,
    source: &str,
    source_idempk: &str,
    update_idempk: Option<&str>,
) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(action.as_str().as_bytes());
    mac.update(b"|");
    mac.update(source.as_bytes());
    mac.update(b"|");
    mac.update(source_idempk.as_bytes());
    if let Some(update_idempk) = update_idempk {
        mac.update(b"|");
        mac.update(update_idempk.as_bytes());
    }
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let a = derive_key_hash(b"secret", CommandAction::CreateTransaction, "billing", "inv-1", None);
        let b = derive_key_hash(b"secret", CommandAction::CreateTransaction, "billing", "inv-1", None);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64); // SHA-256 hex
    }

    #[test]
    fn test_every_component_changes_the_hash() {
        let base = derive_key_hash(b"secret", CommandAction::CreateTransaction, "billing", "inv-1", None);
        assert_ne!(
            base,
            derive_key_hash(b"secret", CommandAction::CreateAccount, "billing", "inv-1", None)
        );
        assert_ne!(
            base,
            derive_key_hash(b"secret", CommandAction::CreateTransaction, "crm", "inv-1", None)
        );
        assert_ne!(
            base,
            derive_key_hash(b"secret", CommandAction::CreateTransaction, "billing", "inv-2", None)
        );
        assert_ne!(
            base,
            derive_key_hash(b"other", CommandAction::CreateTransaction, "billing", "inv-1", None)
        );
    }

    #[test]
    fn test_update_idempk_extends_identity() {
        let create = derive_key_hash(b"secret", CommandAction::UpdateTransaction, "billing", "inv-1", None);
        let update_a =
            derive_key_hash(b"secret", CommandAction::UpdateTransaction, "billing", "inv-1", Some("u1"));
        let update_b =
            derive_key_hash(b"secret", CommandAction::UpdateTransaction, "billing", "inv-1", Some("u2"));
        assert_ne!(create, update_a);
        assert_ne!(update_a, update_b);
    }

    #[test]
    fn test_delimiter_prevents_ambiguity() {
        // "ab" + "c" must not collide with "a" + "bc"
        let a = derive_key_hash(b"secret", CommandAction::CreateTransaction, "ab", "c", None);
        let b = derive_key_hash(b"secret", CommandAction::CreateTransaction, "a", "bc", None);
        assert_ne!(a, b);
    }
}
