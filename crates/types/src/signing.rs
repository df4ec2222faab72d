//! Signing identities and key-rotation lineage
//!
//! A package's signing identity is the set of digests of its current
//! signing certificates plus an ordered rotation lineage. Each lineage
//! node carries the capabilities its key granted to successors. Replacing
//! installed data is authorized when the new identity exactly matches the
//! old one, or when the old signer appears in the new identity's lineage
//! with the required capability still granted.

use serde::{Deserialize, Serialize};

/// Digest of a signing certificate (blake3 over the raw certificate bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignerId(pub [u8; 32]);

impl SignerId {
    /// Derive a signer identity from raw certificate bytes
    #[must_use]
    pub fn from_cert(cert: &[u8]) -> Self {
        Self(*blake3::hash(cert).as_bytes())
    }

    /// Hex rendering for diagnostics
    #[must_use]
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(64);
        for byte in &self.0 {
            use std::fmt::Write;
            let _ = write!(out, "{byte:02x}");
        }
        out
    }

    /// Short prefix used in log lines
    #[must_use]
    pub fn short(&self) -> String {
        self.to_hex()[..12].to_string()
    }
}

impl std::fmt::Display for SignerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.short())
    }
}

/// Capabilities a lineage key grants to its successors
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capabilities(pub u8);

impl Capabilities {
    /// Successor may replace data installed under this key
    pub const INSTALLED_DATA: Capabilities = Capabilities(1);
    /// Successor may join shared-user groups established under this key
    pub const SHARED_USER: Capabilities = Capabilities(1 << 1);
    /// Successor inherits signature-protected permission grants
    pub const PERMISSION: Capabilities = Capabilities(1 << 2);
    /// This key accepts a rollback to an artifact signed by the successor
    pub const ROLLBACK: Capabilities = Capabilities(1 << 3);

    /// Everything a rotated key normally grants
    #[must_use]
    pub fn default_granted() -> Self {
        Self(Self::INSTALLED_DATA.0 | Self::SHARED_USER.0 | Self::PERMISSION.0)
    }

    /// True when every bit of `other` is granted here
    #[must_use]
    pub fn contains(self, other: Capabilities) -> bool {
        self.0 & other.0 == other.0
    }

    /// Union of two capability sets
    #[must_use]
    pub fn union(self, other: Capabilities) -> Self {
        Self(self.0 | other.0)
    }
}

/// One entry in a rotation lineage: a past signer and what it granted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageNode {
    pub signer: SignerId,
    pub granted: Capabilities,
}

/// Complete signing identity of a package artifact
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningDetails {
    /// Current signer set. Multiple entries mean multi-signer; all current
    /// signers must match exactly for two identities to be equal.
    pub signers: Vec<SignerId>,
    /// Rotation history, oldest first. Empty for never-rotated keys.
    pub lineage: Vec<LineageNode>,
}

impl SigningDetails {
    /// Identity signed by a single certificate, no rotation history
    #[must_use]
    pub fn from_cert(cert: &[u8]) -> Self {
        Self {
            signers: vec![SignerId::from_cert(cert)],
            lineage: Vec::new(),
        }
    }

    /// Whether any signer is present at all
    #[must_use]
    pub fn is_signed(&self) -> bool {
        !self.signers.is_empty()
    }

    /// Exact match of the current signer sets, order-insensitive
    #[must_use]
    pub fn signers_match(&self, other: &SigningDetails) -> bool {
        if self.signers.len() != other.signers.len() {
            return false;
        }
        let mut a = self.signers.clone();
        let mut b = other.signers.clone();
        a.sort_unstable();
        b.sort_unstable();
        a == b
    }

    /// Whether `old` is an ancestor in this identity's rotation lineage
    /// with `capability` still granted.
    #[must_use]
    pub fn has_ancestor_with_capability(
        &self,
        old: &SigningDetails,
        capability: Capabilities,
    ) -> bool {
        // Lineage applies to single-signer identities only; multi-signer
        // sets cannot rotate.
        let [old_signer] = old.signers.as_slice() else {
            return false;
        };
        self.lineage
            .iter()
            .any(|node| node.signer == *old_signer && node.granted.contains(capability))
    }

    /// Capability check for replacing installed data: exact signer match,
    /// or descent from the installed signer with the capability granted.
    #[must_use]
    pub fn check_capability(&self, installed: &SigningDetails, capability: Capabilities) -> bool {
        if self.signers_match(installed) {
            return true;
        }
        self.has_ancestor_with_capability(installed, capability)
    }

    /// Symmetric rollback authorization: the installed identity declared a
    /// rollback capability toward the incoming signer, meaning the incoming
    /// artifact is a sanctioned predecessor.
    #[must_use]
    pub fn permits_rollback_to(&self, incoming: &SigningDetails) -> bool {
        let [incoming_signer] = incoming.signers.as_slice() else {
            return false;
        };
        self.lineage
            .iter()
            .any(|node| node.signer == *incoming_signer && node.granted.contains(Capabilities::ROLLBACK))
    }

    /// Append a rotation step, recording what the outgoing key grants.
    #[must_use]
    pub fn rotated(mut self, new_cert: &[u8], granted: Capabilities) -> Self {
        for signer in self.signers.drain(..) {
            self.lineage.push(LineageNode { signer, granted });
        }
        self.signers = vec![SignerId::from_cert(new_cert)];
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const K1: &[u8] = b"certificate-one";
    const K2: &[u8] = b"certificate-two";
    const K3: &[u8] = b"certificate-three";

    #[test]
    fn exact_match_is_order_insensitive() {
        let a = SigningDetails {
            signers: vec![SignerId::from_cert(K1), SignerId::from_cert(K2)],
            lineage: Vec::new(),
        };
        let b = SigningDetails {
            signers: vec![SignerId::from_cert(K2), SignerId::from_cert(K1)],
            lineage: Vec::new(),
        };
        assert!(a.signers_match(&b));
        assert!(a.check_capability(&b, Capabilities::INSTALLED_DATA));
    }

    #[test]
    fn rotation_grants_installed_data() {
        let old = SigningDetails::from_cert(K1);
        let new = SigningDetails::from_cert(K1).rotated(K2, Capabilities::default_granted());

        assert!(!new.signers_match(&old));
        assert!(new.check_capability(&old, Capabilities::INSTALLED_DATA));
        assert!(new.check_capability(&old, Capabilities::SHARED_USER));
    }

    #[test]
    fn rotation_without_grant_denies() {
        let old = SigningDetails::from_cert(K1);
        let new = SigningDetails::from_cert(K1).rotated(K2, Capabilities::PERMISSION);
        assert!(!new.check_capability(&old, Capabilities::INSTALLED_DATA));
    }

    #[test]
    fn unrelated_keys_deny() {
        let old = SigningDetails::from_cert(K1);
        let new = SigningDetails::from_cert(K3);
        assert!(!new.check_capability(&old, Capabilities::INSTALLED_DATA));
        assert!(!old.permits_rollback_to(&new));
    }

    #[test]
    fn rollback_capability_is_directional() {
        // K2 is the current key; its lineage says K1 may come back.
        let installed = SigningDetails::from_cert(K1).rotated(K2, Capabilities::ROLLBACK);
        let incoming = SigningDetails::from_cert(K1);
        assert!(installed.permits_rollback_to(&incoming));

        let stranger = SigningDetails::from_cert(K3);
        assert!(!installed.permits_rollback_to(&stranger));
    }

    #[test]
    fn two_step_lineage_keeps_all_ancestors() {
        let details = SigningDetails::from_cert(K1)
            .rotated(K2, Capabilities::default_granted())
            .rotated(K3, Capabilities::default_granted());

        assert!(details.check_capability(&SigningDetails::from_cert(K1), Capabilities::INSTALLED_DATA));
        assert!(details.check_capability(&SigningDetails::from_cert(K2), Capabilities::INSTALLED_DATA));
    }
}
