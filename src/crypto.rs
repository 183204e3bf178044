// src/crypto.rs

//! Integrity verification
//!
//! Two checks gate everything that crosses the network boundary: a SHA-256
//! content hash for package archives, and a detached OpenPGP signature for
//! repository indexes. Signatures are checked against a trusted keyring
//! directory; a signature counts only if it is cryptographically valid AND
//! was issued by a key present in that keyring.

use crate::error::Result;
use sequoia_openpgp as openpgp;

use openpgp::parse::Parse;
use openpgp::policy::StandardPolicy;
use openpgp::{Cert, Packet, PacketPile};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Compute the SHA-256 of a file and compare against a hex digest
///
/// The comparison is case-insensitive. Returns `Ok(false)` on mismatch;
/// I/O failures are errors.
pub fn verify_file_checksum(path: &Path, expected: &str) -> Result<bool> {
    debug!("verifying checksum for {}", path.display());

    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;

    let actual = format!("{:x}", hasher.finalize());
    if actual.eq_ignore_ascii_case(expected) {
        Ok(true)
    } else {
        warn!(
            "checksum mismatch for {}: expected {}, computed {}",
            path.display(),
            expected,
            actual
        );
        Ok(false)
    }
}

/// Detached-signature verifier backed by a trusted keyring directory
pub struct SignatureVerifier {
    keyring_dir: PathBuf,
    policy: StandardPolicy<'static>,
}

impl SignatureVerifier {
    pub fn new(keyring_dir: impl Into<PathBuf>) -> Self {
        Self {
            keyring_dir: keyring_dir.into(),
            policy: StandardPolicy::new(),
        }
    }

    /// Load every certificate in the keyring directory
    ///
    /// Unparseable key files are skipped with a warning.
    fn load_keyring(&self) -> Result<Vec<Cert>> {
        let mut certs = Vec::new();

        if !self.keyring_dir.is_dir() {
            warn!(
                "trusted keyring directory {} does not exist",
                self.keyring_dir.display()
            );
            return Ok(certs);
        }

        for entry in fs::read_dir(&self.keyring_dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let data = fs::read(&path)?;
            match Cert::from_bytes(&data) {
                Ok(cert) => {
                    debug!(
                        "loaded trusted key {} from {}",
                        cert.fingerprint(),
                        path.display()
                    );
                    certs.push(cert);
                }
                Err(e) => warn!("skipping unparseable key file {}: {e}", path.display()),
            }
        }

        Ok(certs)
    }

    /// Verify a detached signature over a data file
    ///
    /// Returns `Ok(true)` iff at least one signature in the signature file is
    /// valid and was made by a signing-capable key from the trusted keyring.
    pub fn verify_detached(&self, data_path: &Path, signature_path: &Path) -> Result<bool> {
        if !data_path.exists() || !signature_path.exists() {
            warn!("cannot verify signature: data or signature file is missing");
            return Ok(false);
        }

        let certs = self.load_keyring()?;
        if certs.is_empty() {
            warn!("trusted keyring is empty; refusing signature");
            return Ok(false);
        }

        let message = fs::read(data_path)?;
        let signature_data = fs::read(signature_path)?;

        let pile = match PacketPile::from_bytes(&signature_data) {
            Ok(pile) => pile,
            Err(e) => {
                warn!("cannot parse detached signature: {e}");
                return Ok(false);
            }
        };

        for packet in pile.into_children() {
            let Packet::Signature(mut sig) = packet else {
                continue;
            };
            for cert in &certs {
                for ka in cert
                    .keys()
                    .with_policy(&self.policy, None)
                    .for_signing()
                {
                    if sig.verify_message(ka.key(), &message).is_ok() {
                        info!(
                            "found valid, trusted signature from {}",
                            cert.fingerprint()
                        );
                        return Ok(true);
                    }
                }
            }
        }

        warn!("no valid signature from a trusted key found");
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_checksum_match() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("data");
        fs::write(&path, b"hello world").unwrap();

        // sha256("hello world")
        let expected = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";
        assert!(verify_file_checksum(&path, expected).unwrap());
    }

    #[test]
    fn test_checksum_case_insensitive() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("data");
        fs::write(&path, b"hello world").unwrap();

        let expected = "B94D27B9934D3E08A52E52D7DA7DABFAC484EFE37A5380EE9088F7ACE2EFCDE9";
        assert!(verify_file_checksum(&path, expected).unwrap());
    }

    #[test]
    fn test_checksum_mismatch() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("data");
        fs::write(&path, b"hello world").unwrap();

        assert!(!verify_file_checksum(&path, "0000").unwrap());
    }

    #[test]
    fn test_checksum_missing_file() {
        let tmp = TempDir::new().unwrap();
        assert!(verify_file_checksum(&tmp.path().join("nope"), "00").is_err());
    }

    #[test]
    fn test_signature_empty_keyring() {
        let tmp = TempDir::new().unwrap();
        let data = tmp.path().join("repo.yaml");
        let sig = tmp.path().join("repo.yaml.sig");
        fs::write(&data, b"[]").unwrap();
        fs::write(&sig, b"garbage").unwrap();

        let keyring = tmp.path().join("keys");
        fs::create_dir_all(&keyring).unwrap();
        let verifier = SignatureVerifier::new(&keyring);
        assert!(!verifier.verify_detached(&data, &sig).unwrap());
    }

    #[test]
    fn test_signature_missing_files() {
        let tmp = TempDir::new().unwrap();
        let verifier = SignatureVerifier::new(tmp.path().join("keys"));
        assert!(!verifier
            .verify_detached(&tmp.path().join("a"), &tmp.path().join("b"))
            .unwrap());
    }
}
