use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

pub mod policy {
    use super::Expiration;
    use std::time::Duration;

    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ReadPolicy {
        pub total_timeout: Option<Duration>,
    }

    impl ReadPolicy {
        pub fn new(total_timeout: Option<Duration>) -> Self {
            Self { total_timeout }
        }
    }

    /// What a write does when the record already exists
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub enum RecordExistsAction {
        #[default]
        Update,
        CreateOnly,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct WritePolicy {
        pub expiration: Expiration,
        pub exists: RecordExistsAction,
        pub send_key: bool,
        pub total_timeout: Option<Duration>,
    }

    impl WritePolicy {
        pub fn new(expiration: Expiration) -> Self {
            Self {
                expiration,
                exists: RecordExistsAction::Update,
                send_key: true,
                total_timeout: None,
            }
        }

        pub fn create_only(mut self) -> Self {
            self.exists = RecordExistsAction::CreateOnly;
            self
        }

        pub fn with_total_timeout(mut self, total_timeout: Option<std::time::Duration>) -> Self {
            self.total_timeout = total_timeout;
            self
        }
    }
}

/// Record expiration as understood by the record store
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Expiration {
    Seconds(u32),
    Never,
    /// The record is invalid as soon as it is written.
    Expired,
}

impl Expiration {
    /// Translates a cache timeout into a store expiration.
    ///
    /// `None` falls back to `default_timeout`, `0` never expires, a positive
    /// value expires after that many seconds and a negative value is already
    /// expired.
    pub fn from_timeout(timeout: Option<i64>, default_timeout: u32) -> Self {
        match timeout.unwrap_or(i64::from(default_timeout)) {
            0 => Expiration::Never,
            t if t < 0 => Expiration::Expired,
            t => Expiration::Seconds(u32::try_from(t).unwrap_or(u32::MAX)),
        }
    }
}

/// Native value types of the record store
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Bin {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Blob(#[serde(with = "serde_bytes")] Vec<u8>),
    List(Vec<Bin>),
    Map(BTreeMap<String, Bin>),
}

pub type Bins = BTreeMap<String, Bin>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordMetadata {
    pub generation: u32,
    /// Remaining lifetime in seconds, `None` if the record never expires
    pub ttl: Option<u32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub meta: RecordMetadata,
    pub bins: Bins,
}

/// Address of a record: namespace, optional set and a fixed-size digest of the user key
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub namespace: String,
    pub set_name: Option<String>,
    pub user_key: String,
    pub digest: [u8; RecordKey::DIGEST_LEN],
}

impl RecordKey {
    pub const DIGEST_LEN: usize = 20;
    const STRING_KEY_TYPE: u8 = 3;

    /// An empty set name addresses the null set
    pub fn new(namespace: &str, set_name: Option<&str>, user_key: &str) -> Self {
        let set_name = set_name.filter(|s| !s.is_empty());
        Self {
            namespace: namespace.to_string(),
            set_name: set_name.map(str::to_string),
            user_key: user_key.to_string(),
            digest: Self::compute_digest(set_name, user_key),
        }
    }

    /// Length-prefixing the set name keeps distinct (set, key) pairs from
    /// hashing the same input.
    pub fn compute_digest(set_name: Option<&str>, user_key: &str) -> [u8; Self::DIGEST_LEN] {
        let set = set_name.unwrap_or_default().as_bytes();

        let mut hasher = Sha256::new();
        hasher.update((set.len() as u32).to_be_bytes());
        hasher.update(set);
        hasher.update([Self::STRING_KEY_TYPE]);
        hasher.update(user_key.as_bytes());
        let hash = hasher.finalize();

        let mut digest = [0u8; Self::DIGEST_LEN];
        digest.copy_from_slice(&hash[..Self::DIGEST_LEN]);
        digest
    }

    pub fn set_name(&self) -> &str {
        self.set_name.as_deref().unwrap_or_default()
    }

    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest)
    }
}

impl fmt::Debug for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordKey")
            .field("namespace", &self.namespace)
            .field("set_name", &self.set_name)
            .field("user_key", &self.user_key)
            .field("digest", &self.digest_hex())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiration_from_timeout() {
        assert_eq!(Expiration::from_timeout(None, 300), Expiration::Seconds(300));
        assert_eq!(Expiration::from_timeout(None, 0), Expiration::Never);
        assert_eq!(Expiration::from_timeout(Some(0), 300), Expiration::Never);
        assert_eq!(Expiration::from_timeout(Some(5), 300), Expiration::Seconds(5));
        assert_eq!(Expiration::from_timeout(Some(-1), 300), Expiration::Expired);
        assert_eq!(
            Expiration::from_timeout(Some(i64::MAX), 300),
            Expiration::Seconds(u32::MAX)
        );
    }

    #[test]
    fn test_record_key_is_deterministic() {
        let a = RecordKey::new("cache", Some("web"), "view//index");
        let b = RecordKey::new("cache", Some("web"), "view//index");
        assert_eq!(a, b);
        assert_eq!(a.digest.len(), RecordKey::DIGEST_LEN);
    }

    #[test]
    fn test_record_key_does_not_alias() {
        let keys = [
            RecordKey::new("cache", Some("a"), "bc"),
            RecordKey::new("cache", Some("ab"), "c"),
            RecordKey::new("cache", None, "abc"),
            RecordKey::new("cache", Some(""), "abc2"),
            RecordKey::new("cache", None, "k1"),
            RecordKey::new("cache", None, "k2"),
        ];

        for (i, a) in keys.iter().enumerate() {
            for b in keys.iter().skip(i + 1) {
                assert_ne!(a.digest, b.digest, "{:?} aliases {:?}", a, b);
            }
        }
    }

    #[test]
    fn test_null_set_matches_empty_set_address() {
        let null_set = RecordKey::new("cache", None, "k");
        assert_eq!(null_set.set_name(), "");
        assert_eq!(null_set.digest, RecordKey::compute_digest(Some(""), "k"));

        let empty_set = RecordKey::new("cache", Some(""), "k");
        assert_eq!(empty_set, null_set);
        assert_eq!(empty_set.set_name, None);
    }

    #[test]
    fn test_write_policy_builders() {
        let policy = policy::WritePolicy::new(Expiration::Never).create_only();
        assert_eq!(policy.exists, policy::RecordExistsAction::CreateOnly);
        assert!(policy.send_key);
        assert_eq!(policy.total_timeout, None);
    }
}
