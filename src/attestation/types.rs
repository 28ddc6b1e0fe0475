use std::fmt;
use std::str::FromStr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};

use crate::crypto::PublicKey;
use crate::error::AttestError;

/// Magic bytes opening every serialized record.
pub const RECORD_MAGIC: &[u8; 4] = b"EMAT";

/// Current record format version.
pub const RECORD_VERSION: u8 = 1;

/// Length of a code measurement hash.
pub const MEASUREMENT_LEN: usize = 32;

/// Bytes covered by the signature (everything before it).
const SIGNED_LEN: usize = 4 + 1 + 1 + 2 + MEASUREMENT_LEN + 32 + 32;

/// Total serialized record length.
pub const RECORD_LEN: usize = SIGNED_LEN + 64;

const SIGNATURE_DOMAIN: &[u8] = b"enclave-mail:attestation:v1\0";

/// How the isolated node is running, from most to least trustworthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SecurityMode {
    Production = 0x01,
    Debug = 0x02,
    Simulation = 0x03,
    Insecure = 0x04,
}

impl SecurityMode {
    pub fn from_u8(v: u8) -> Result<Self, AttestError> {
        match v {
            0x01 => Ok(Self::Production),
            0x02 => Ok(Self::Debug),
            0x03 => Ok(Self::Simulation),
            0x04 => Ok(Self::Insecure),
            other => Err(AttestError::Malformed(format!(
                "unknown security mode 0x{other:02X}"
            ))),
        }
    }

    /// Trust rank: PRODUCTION > DEBUG > SIMULATION > INSECURE.
    pub const fn rank(self) -> u8 {
        match self {
            Self::Production => 3,
            Self::Debug => 2,
            Self::Simulation => 1,
            Self::Insecure => 0,
        }
    }

    /// Whether this mode is at least as trustworthy as `minimum`.
    pub const fn satisfies(self, minimum: SecurityMode) -> bool {
        self.rank() >= minimum.rank()
    }

    /// Modes whose records must come from a trusted hardware authority.
    pub const fn requires_trusted_authority(self) -> bool {
        matches!(self, Self::Production | Self::Debug)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Production => "PRODUCTION",
            Self::Debug => "DEBUG",
            Self::Simulation => "SIMULATION",
            Self::Insecure => "INSECURE",
        }
    }
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecurityMode {
    type Err = AttestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PRODUCTION" => Ok(Self::Production),
            "DEBUG" => Ok(Self::Debug),
            "SIMULATION" => Ok(Self::Simulation),
            "INSECURE" => Ok(Self::Insecure),
            other => Err(AttestError::ConstraintSyntax(format!(
                "unknown security level {other:?}"
            ))),
        }
    }
}

/// Hash identifying the exact code loaded in an isolated node.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Measurement(pub [u8; MEASUREMENT_LEN]);

impl Measurement {
    /// Measure a code image (SHA-256).
    pub fn of(code: &[u8]) -> Self {
        Self(Sha256::digest(code).into())
    }

    pub fn as_bytes(&self) -> &[u8; MEASUREMENT_LEN] {
        &self.0
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

impl fmt::Debug for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Measurement({self})")
    }
}

/// Parses hex in either case; anything else is a constraint syntax error.
impl FromStr for Measurement {
    type Err = AttestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)
            .map_err(|e| AttestError::ConstraintSyntax(format!("malformed hex {s:?}: {e}")))?;
        let arr: [u8; MEASUREMENT_LEN] = bytes.try_into().map_err(|b: Vec<u8>| {
            AttestError::ConstraintSyntax(format!(
                "measurement must be {MEASUREMENT_LEN} bytes, got {}",
                b.len()
            ))
        })?;
        Ok(Self(arr))
    }
}

/// A signed statement binding a node's mail key to its code measurement.
///
/// Values of this type only come from [`AttestationRecord::sign`] or a
/// successful [`AttestationRecord::deserialize`], so every instance carries a
/// signature that verifies against its own authority key.
#[derive(Clone, PartialEq, Eq)]
pub struct AttestationRecord {
    public_key: PublicKey,
    measurement: Measurement,
    product_id: u16,
    security_mode: SecurityMode,
    authority_key: [u8; 32],
    signature: [u8; 64],
}

impl AttestationRecord {
    /// Build and sign a record.
    pub fn sign(
        authority: &SigningKey,
        public_key: PublicKey,
        measurement: Measurement,
        product_id: u16,
        security_mode: SecurityMode,
    ) -> Self {
        let authority_key = authority.verifying_key().to_bytes();
        let body = encode_signed_fields(
            &public_key,
            &measurement,
            product_id,
            security_mode,
            &authority_key,
        );
        let signature = authority.sign(&signing_message(&body)).to_bytes();
        Self {
            public_key,
            measurement,
            product_id,
            security_mode,
            authority_key,
            signature,
        }
    }

    /// Parse and verify a serialized record.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, AttestError> {
        if bytes.len() != RECORD_LEN {
            return Err(AttestError::Malformed(format!(
                "expected {RECORD_LEN} bytes, got {}",
                bytes.len()
            )));
        }

        let mut cursor = bytes;
        if &cursor[..4] != RECORD_MAGIC {
            return Err(AttestError::Malformed("bad magic".into()));
        }
        cursor.advance(4);

        let version = cursor.get_u8();
        if version != RECORD_VERSION {
            return Err(AttestError::Malformed(format!(
                "unsupported record version {version}"
            )));
        }

        let security_mode = SecurityMode::from_u8(cursor.get_u8())?;
        let product_id = cursor.get_u16();

        let mut measurement = [0u8; MEASUREMENT_LEN];
        cursor.copy_to_slice(&mut measurement);
        let mut public_key = [0u8; 32];
        cursor.copy_to_slice(&mut public_key);
        let mut authority_key = [0u8; 32];
        cursor.copy_to_slice(&mut authority_key);
        let mut signature = [0u8; 64];
        cursor.copy_to_slice(&mut signature);

        if public_key == [0u8; 32] {
            return Err(AttestError::Malformed("all-zero mail public key".into()));
        }

        let verifying_key = VerifyingKey::from_bytes(&authority_key)
            .map_err(|_| AttestError::Malformed("invalid authority key encoding".into()))?;
        let sig = Signature::from_bytes(&signature);
        verifying_key
            .verify_strict(&signing_message(&bytes[..SIGNED_LEN]), &sig)
            .map_err(|_| AttestError::Malformed("signature does not verify".into()))?;

        Ok(Self {
            public_key,
            measurement: Measurement(measurement),
            product_id,
            security_mode,
            authority_key,
            signature,
        })
    }

    /// Exact inverse of [`AttestationRecord::deserialize`].
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(RECORD_LEN);
        buf.put_slice(&encode_signed_fields(
            &self.public_key,
            &self.measurement,
            self.product_id,
            self.security_mode,
            &self.authority_key,
        ));
        buf.put_slice(&self.signature);
        buf.freeze()
    }

    /// The node's X25519 key that mail must be addressed to.
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn measurement(&self) -> &Measurement {
        &self.measurement
    }

    pub fn product_id(&self) -> u16 {
        self.product_id
    }

    pub fn security_mode(&self) -> SecurityMode {
        self.security_mode
    }

    /// Ed25519 key of the authority that signed this record.
    pub fn authority_key(&self) -> &[u8; 32] {
        &self.authority_key
    }

    /// SHA-256 of the serialized record, for logging.
    pub fn digest(&self) -> [u8; 32] {
        Sha256::digest(self.serialize()).into()
    }
}

impl fmt::Display for AttestationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AttestationRecord(measurement={}, product_id={}, security_mode={}, public_key={}, authority={})",
            self.measurement,
            self.product_id,
            self.security_mode,
            hex::encode(self.public_key),
            hex::encode(&self.authority_key[..8]),
        )
    }
}

impl fmt::Debug for AttestationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

fn encode_signed_fields(
    public_key: &PublicKey,
    measurement: &Measurement,
    product_id: u16,
    security_mode: SecurityMode,
    authority_key: &[u8; 32],
) -> BytesMut {
    let mut buf = BytesMut::with_capacity(SIGNED_LEN);
    buf.put_slice(RECORD_MAGIC);
    buf.put_u8(RECORD_VERSION);
    buf.put_u8(security_mode as u8);
    buf.put_u16(product_id);
    buf.put_slice(measurement.as_bytes());
    buf.put_slice(public_key);
    buf.put_slice(authority_key);
    buf
}

fn signing_message(body: &[u8]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(SIGNATURE_DOMAIN.len() + body.len());
    msg.extend_from_slice(SIGNATURE_DOMAIN);
    msg.extend_from_slice(body);
    msg
}
