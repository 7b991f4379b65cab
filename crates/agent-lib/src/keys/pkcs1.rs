//! PKCS#1 `RSAPrivateKey` structure (RFC 3447, appendix A.1.2)

use super::der::{DerInteger, DerReader, DerWriter};
use super::KeyError;

/// Two-prime RSA keys carry version 0
const TWO_PRIME_VERSION: u64 = 0;

/// The nine integers of an RSA private key in CRT form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaPrivateKeyComponents {
    pub version: DerInteger,
    pub modulus: DerInteger,
    pub public_exponent: DerInteger,
    pub private_exponent: DerInteger,
    pub prime1: DerInteger,
    pub prime2: DerInteger,
    pub exponent1: DerInteger,
    pub exponent2: DerInteger,
    pub coefficient: DerInteger,
}

impl RsaPrivateKeyComponents {
    /// Parse the DER encoding of an `RSAPrivateKey`
    pub fn from_der(der: &[u8]) -> Result<Self, KeyError> {
        let mut outer = DerReader::new(der);
        let mut seq = outer.read_sequence()?;

        let components = Self {
            version: seq.read_integer()?,
            modulus: seq.read_integer()?,
            public_exponent: seq.read_integer()?,
            private_exponent: seq.read_integer()?,
            prime1: seq.read_integer()?,
            prime2: seq.read_integer()?,
            exponent1: seq.read_integer()?,
            exponent2: seq.read_integer()?,
            coefficient: seq.read_integer()?,
        };

        if components.version.to_u64() != Some(TWO_PRIME_VERSION) {
            return Err(KeyError::UnsupportedRsaVersion);
        }
        // Multi-prime keys append otherPrimeInfos; anything left over is rejected
        if !seq.is_empty() || !outer.is_empty() {
            return Err(KeyError::TrailingData);
        }

        Ok(components)
    }

    /// Canonical DER encoding of the components
    pub fn to_der(&self) -> Vec<u8> {
        let mut writer = DerWriter::new();
        writer.write_sequence(|seq| {
            for value in self.integers() {
                seq.write_integer(value);
            }
        });
        writer.finish()
    }

    /// Fields in grammar order
    pub fn integers(&self) -> [&DerInteger; 9] {
        [
            &self.version,
            &self.modulus,
            &self.public_exponent,
            &self.private_exponent,
            &self.prime1,
            &self.prime2,
            &self.exponent1,
            &self.exponent2,
            &self.coefficient,
        ]
    }

    /// Modulus size in bits
    pub fn modulus_bits(&self) -> usize {
        self.modulus.bit_len()
    }

    /// Reject structurally impossible keys before handing them to the signer
    pub(crate) fn check_consistency(&self) -> Result<(), KeyError> {
        let all_positive = self
            .integers()
            .iter()
            .skip(1)
            .all(|value| !value.is_negative() && value.bit_len() > 0);
        if !all_positive {
            return Err(KeyError::InvalidRsaComponents(
                "key components must be positive".into(),
            ));
        }
        if self.prime1.bit_len() + self.prime2.bit_len() < self.modulus_bits() {
            return Err(KeyError::InvalidRsaComponents(
                "primes are too small for the modulus".into(),
            ));
        }
        Ok(())
    }
}
