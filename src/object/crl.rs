//! Certificate Revocation Lists.

use std::collections::HashMap;
use rpki::repository::crypto::keys::KeyIdentifier;
use rpki::repository::x509::Serial;
use crate::crypto::{self, CryptoError};

//------------ Crl ------------------------------------------------------------

/// A parsed CRL, keyed by its issuer's AKI in [`CrlTree`].
pub struct Crl {
    pub aki: KeyIdentifier,
    revoked: Vec<Serial>,
}

impl Crl {
    /// `crl_parse`: decodes a standard X.509 CRL.
    pub fn crl_parse(der: &[u8]) -> Result<Crl, CryptoError> {
        let inner = crypto::decode_crl(der)?;
        let aki = inner.authority_key_identifier()
            .ok_or(CryptoError::Malformed)?;
        let revoked = inner.revoked_certs()
            .map(|entry| entry.serial())
            .collect();
        Ok(Crl { aki, revoked })
    }

    pub fn is_revoked(&self, serial: Serial) -> bool {
        self.revoked.contains(&serial)
    }
}

//------------ CrlTree --------------------------------------------------------

/// The CRL index keyed by issuer AKI, per the data model.
#[derive(Default)]
pub struct CrlTree {
    by_aki: HashMap<KeyIdentifier, Crl>,
}

impl CrlTree {
    pub fn new() -> Self {
        CrlTree::default()
    }

    pub fn insert(&mut self, crl: Crl) {
        self.by_aki.insert(crl.aki, crl);
    }

    pub fn get(&self, aki: &KeyIdentifier) -> Option<&Crl> {
        self.by_aki.get(aki)
    }
}
