use crate::{Result, constants::MAX_UID_LENGTH, error::Error};
use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;

/// Token UID as reported during anti-collision (1-7 bytes).
///
/// # Security
/// Comparison is constant-time to avoid leaking how many leading bytes of
/// a presented UID match a stored one.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TokenUid {
    bytes: Vec<u8>,
}

impl TokenUid {
    /// Create a UID from raw anti-collision bytes.
    ///
    /// # Errors
    /// Returns `Error::InvalidUid` if the slice is empty or longer than
    /// [`MAX_UID_LENGTH`].
    pub fn new(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() || bytes.len() > MAX_UID_LENGTH {
            return Err(Error::InvalidUid(format!(
                "UID must be 1-{MAX_UID_LENGTH} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(TokenUid {
            bytes: bytes.to_vec(),
        })
    }

    /// Parse a UID from its lowercase hex wire representation.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| Error::InvalidUid(format!("{s}: {e}")))?;
        Self::new(&bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Hex representation used on the wire and in logs.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}

impl PartialEq for TokenUid {
    fn eq(&self, other: &Self) -> bool {
        self.bytes.ct_eq(&other.bytes).into()
    }
}

impl std::hash::Hash for TokenUid {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl fmt::Display for TokenUid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl std::str::FromStr for TokenUid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        TokenUid::from_hex(s)
    }
}

impl TryFrom<String> for TokenUid {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        TokenUid::from_hex(&s)
    }
}

impl From<TokenUid> for String {
    fn from(uid: TokenUid) -> String {
        uid.to_hex()
    }
}

/// Outcome of resolving a UID, whether the server or the offline
/// database answered. `access_level` 0 means an explicit deny.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDecision {
    pub access_level: u8,
    pub user: String,
}

impl AccessDecision {
    #[must_use]
    pub fn granted(&self) -> bool {
        self.access_level > 0
    }

    /// Grant with the given display name.
    #[must_use]
    pub fn grant(user: impl Into<String>) -> Self {
        AccessDecision {
            access_level: 1,
            user: user.into(),
        }
    }

    /// Explicit deny.
    #[must_use]
    pub fn deny() -> Self {
        AccessDecision {
            access_level: 0,
            user: String::new(),
        }
    }
}

/// Which authority produced an access decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthSource {
    /// The control server answered within the query timeout.
    Server,
    /// The query timed out and the offline token database answered.
    OfflineDb,
}

impl fmt::Display for AuthSource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AuthSource::Server => write!(f, "server"),
            AuthSource::OfflineDb => write!(f, "offline-db"),
        }
    }
}
