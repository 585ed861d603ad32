//! Hash functions, HMAC and the Noise HKDF
//!
//! SHA-256, SHA-512, BLAKE2s and BLAKE2b behind one enum. HMAC is the
//! standard RFC 2104 construction for every hash, including BLAKE2.

use blake2::{Blake2b512, Blake2s256};
use hmac::{
    digest::{core_api::BlockSizeUser, Digest},
    Mac, SimpleHmac,
};
use sha2::{Sha256, Sha512};
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Hash function named in a Noise protocol name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha256,
    Sha512,
    Blake2s,
    Blake2b,
}

fn digest_with<D: Digest>(parts: &[&[u8]]) -> Vec<u8> {
    let mut hasher = D::new();
    for part in parts {
        Digest::update(&mut hasher, part);
    }
    hasher.finalize().to_vec()
}

fn hmac_with<D>(key: &[u8], data: &[&[u8]]) -> Vec<u8>
where
    D: Digest + BlockSizeUser,
{
    let mut mac =
        <SimpleHmac<D> as Mac>::new_from_slice(key).expect("HMAC accepts any key length");
    for part in data {
        Mac::update(&mut mac, part);
    }
    mac.finalize().into_bytes().to_vec()
}

impl HashAlgorithm {
    /// Resolve the hash token of a protocol name
    pub fn from_name(name: &str) -> Result<Self, CryptoError> {
        match name {
            "SHA256" => Ok(Self::Sha256),
            "SHA512" => Ok(Self::Sha512),
            "BLAKE2s" => Ok(Self::Blake2s),
            "BLAKE2b" => Ok(Self::Blake2b),
            _ => Err(CryptoError::UnsupportedPrimitive {
                component: "hash function",
                name: name.to_string(),
            }),
        }
    }

    /// Token used in protocol names
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sha256 => "SHA256",
            Self::Sha512 => "SHA512",
            Self::Blake2s => "BLAKE2s",
            Self::Blake2b => "BLAKE2b",
        }
    }

    /// Output length (HASHLEN)
    pub fn hash_len(&self) -> usize {
        match self {
            Self::Sha256 | Self::Blake2s => 32,
            Self::Sha512 | Self::Blake2b => 64,
        }
    }

    /// One-shot hash of a single input
    pub fn hash(&self, data: &[u8]) -> Vec<u8> {
        self.hash_parts(&[data])
    }

    /// Hash of concatenated inputs: HASH(a || b || ...)
    pub fn hash_parts(&self, parts: &[&[u8]]) -> Vec<u8> {
        match self {
            Self::Sha256 => digest_with::<Sha256>(parts),
            Self::Sha512 => digest_with::<Sha512>(parts),
            Self::Blake2s => digest_with::<Blake2s256>(parts),
            Self::Blake2b => digest_with::<Blake2b512>(parts),
        }
    }

    /// HMAC-HASH(key, data[0] || data[1] || ...)
    pub fn hmac(&self, key: &[u8], data: &[&[u8]]) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(match self {
            Self::Sha256 => hmac_with::<Sha256>(key, data),
            Self::Sha512 => hmac_with::<Sha512>(key, data),
            Self::Blake2s => hmac_with::<Blake2s256>(key, data),
            Self::Blake2b => hmac_with::<Blake2b512>(key, data),
        })
    }

    /// HKDF with two outputs, each HASHLEN bytes
    pub fn hkdf2(
        &self,
        chaining_key: &[u8],
        input_key_material: &[u8],
    ) -> (Zeroizing<Vec<u8>>, Zeroizing<Vec<u8>>) {
        let temp = self.hmac(chaining_key, &[input_key_material]);

        // T1 = HMAC(temp, 0x01)
        let t1 = self.hmac(&temp, &[&[0x01u8][..]]);
        // T2 = HMAC(temp, T1 || 0x02)
        let t2 = self.hmac(&temp, &[t1.as_slice(), &[0x02u8][..]]);

        (t1, t2)
    }

    /// HKDF with three outputs, each HASHLEN bytes
    pub fn hkdf3(
        &self,
        chaining_key: &[u8],
        input_key_material: &[u8],
    ) -> (Zeroizing<Vec<u8>>, Zeroizing<Vec<u8>>, Zeroizing<Vec<u8>>) {
        let temp = self.hmac(chaining_key, &[input_key_material]);

        let t1 = self.hmac(&temp, &[&[0x01u8][..]]);
        let t2 = self.hmac(&temp, &[t1.as_slice(), &[0x02u8][..]]);
        // T3 = HMAC(temp, T2 || 0x03)
        let t3 = self.hmac(&temp, &[t2.as_slice(), &[0x03u8][..]]);

        (t1, t2, t3)
    }
}
