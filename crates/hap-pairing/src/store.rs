//! Persistence of long-term pairings, one record per accessory.
//!
//! A record holds exactly what pair-verify needs on the next connection: our
//! identifier and signing seed, and the accessory's identifier and LTPK.
//! Stores key records by the accessory's pairing identifier, so one store can
//! serve any number of accessories.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use hap_core::error::{Error, ParseError, Result};
use hap_crypto::ed25519::IdentityKeyPair;
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::identity::{LongTermIdentity, Pairing, PeerLongTermPublicKey};

/// Serialized pairing, stored as JSON.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct PairingRecord {
    #[zeroize(skip)]
    pub device_id: String,
    /// Hex-encoded Ed25519 seed.
    pub signing_key: String,
    #[zeroize(skip)]
    pub peer_id: String,
    /// Hex-encoded accessory LTPK.
    #[zeroize(skip)]
    pub peer_public_key: String,
}

impl PairingRecord {
    pub fn new(identity: &LongTermIdentity, peer: &PeerLongTermPublicKey) -> Self {
        Self {
            device_id: identity.device_id().to_string(),
            signing_key: hex::encode(identity.keypair().seed()),
            peer_id: peer.id.clone(),
            peer_public_key: hex::encode(peer.public_key),
        }
    }

    pub fn identity(&self) -> Result<LongTermIdentity> {
        let seed = Zeroizing::new(decode_hex("signing_key", &self.signing_key)?);
        let keypair = IdentityKeyPair::from_seed_slice(&seed)?;
        Ok(LongTermIdentity::from_parts(self.device_id.clone(), keypair))
    }

    pub fn peer(&self) -> Result<PeerLongTermPublicKey> {
        let public_key = decode_hex("peer_public_key", &self.peer_public_key)?;
        PeerLongTermPublicKey::from_tlv(self.peer_id.as_bytes(), &public_key)
    }

    pub fn pairing(&self) -> Result<Pairing> {
        Ok(Pairing {
            identity: self.identity()?,
            peer: self.peer()?,
        })
    }
}

impl std::fmt::Debug for PairingRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairingRecord")
            .field("device_id", &self.device_id)
            .field("peer_id", &self.peer_id)
            .field("peer_public_key", &self.peer_public_key)
            .finish_non_exhaustive()
    }
}

fn decode_hex(field: &'static str, value: &str) -> Result<Vec<u8>> {
    hex::decode(value)
        .map_err(|e| Error::Parse(ParseError::InvalidHex(format!("{}: {}", field, e))))
}

/// Where pairing records live between connections.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait PairingStore: Send + Sync {
    /// Every stored pairing, ordered by accessory identifier.
    fn load_all(&self) -> Result<Vec<PairingRecord>>;

    fn load(&self, peer_id: &str) -> Result<Option<PairingRecord>>;

    /// Insert the record, replacing any earlier one for the same accessory.
    fn save(&self, record: &PairingRecord) -> Result<()>;

    /// Forget the pairing with one accessory. Unknown ids are not an error.
    fn remove(&self, peer_id: &str) -> Result<()>;
}

type Records = BTreeMap<String, PairingRecord>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Pairing records kept in one pretty-printed JSON object, keyed by
/// accessory identifier.
#[derive(Debug)]
pub struct FilePairingStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles between connections.
    write_lock: Mutex<()>,
}

impl FilePairingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Records> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no pairing file on disk");
            return Ok(Records::new());
        }
        let contents = Zeroizing::new(std::fs::read_to_string(&self.path)?);
        Ok(serde_json::from_str(&contents)?)
    }

    fn write(&self, records: &Records) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let contents = Zeroizing::new(serde_json::to_string_pretty(records)?);
        std::fs::write(&self.path, contents.as_bytes())?;
        Ok(())
    }
}

impl PairingStore for FilePairingStore {
    fn load_all(&self) -> Result<Vec<PairingRecord>> {
        let _guard = lock(&self.write_lock);
        let records = self.read()?;
        debug!(path = %self.path.display(), count = records.len(), "loaded pairing records");
        Ok(records.into_values().collect())
    }

    fn load(&self, peer_id: &str) -> Result<Option<PairingRecord>> {
        let _guard = lock(&self.write_lock);
        Ok(self.read()?.remove(peer_id))
    }

    fn save(&self, record: &PairingRecord) -> Result<()> {
        let _guard = lock(&self.write_lock);
        let mut records = self.read()?;
        records.insert(record.peer_id.clone(), record.clone());
        self.write(&records)?;
        debug!(path = %self.path.display(), peer_id = %record.peer_id, "saved pairing record");
        Ok(())
    }

    fn remove(&self, peer_id: &str) -> Result<()> {
        let _guard = lock(&self.write_lock);
        let mut records = self.read()?;
        if records.remove(peer_id).is_some() {
            self.write(&records)?;
            debug!(path = %self.path.display(), peer_id, "removed pairing record");
        }
        Ok(())
    }
}

/// In-process store; pairings last as long as the store.
#[derive(Default)]
pub struct MemoryPairingStore {
    records: Mutex<Records>,
}

impl MemoryPairingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: PairingRecord) -> Self {
        let store = Self::new();
        lock(&store.records).insert(record.peer_id.clone(), record);
        store
    }
}

impl PairingStore for MemoryPairingStore {
    fn load_all(&self) -> Result<Vec<PairingRecord>> {
        Ok(lock(&self.records).values().cloned().collect())
    }

    fn load(&self, peer_id: &str) -> Result<Option<PairingRecord>> {
        Ok(lock(&self.records).get(peer_id).cloned())
    }

    fn save(&self, record: &PairingRecord) -> Result<()> {
        lock(&self.records).insert(record.peer_id.clone(), record.clone());
        Ok(())
    }

    fn remove(&self, peer_id: &str) -> Result<()> {
        lock(&self.records).remove(peer_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_for(peer_id: &str) -> (LongTermIdentity, PeerLongTermPublicKey, PairingRecord) {
        let identity = LongTermIdentity::generate();
        let peer = PeerLongTermPublicKey {
            id: peer_id.to_string(),
            public_key: IdentityKeyPair::generate().public_key(),
        };
        let record = PairingRecord::new(&identity, &peer);
        (identity, peer, record)
    }

    fn sample() -> (LongTermIdentity, PeerLongTermPublicKey, PairingRecord) {
        sample_for("AA:BB:CC:DD:EE:FF")
    }

    mod record {
        use super::*;

        #[test]
        fn restores_identity_and_peer() {
            let (identity, peer, record) = sample();

            let restored = record.identity().unwrap();
            assert_eq!(restored.device_id(), identity.device_id());
            assert_eq!(restored.public_key(), identity.public_key());
            assert_eq!(record.peer().unwrap(), peer);

            let pairing = record.pairing().unwrap();
            assert_eq!(pairing.peer, peer);
            assert_eq!(pairing.identity.device_id(), identity.device_id());
        }

        #[test]
        fn json_uses_expected_field_names() {
            let (_, _, record) = sample();
            let value: serde_json::Value = serde_json::to_value(&record).unwrap();
            for field in ["device_id", "signing_key", "peer_id", "peer_public_key"] {
                assert!(value.get(field).is_some(), "missing {}", field);
            }
        }

        #[test]
        fn bad_hex_is_parse_error() {
            let (_, _, mut record) = sample();
            record.peer_public_key = "zz".to_string();
            assert!(matches!(
                record.peer(),
                Err(Error::Parse(ParseError::InvalidHex(_)))
            ));
        }

        #[test]
        fn short_seed_is_rejected() {
            let (_, _, mut record) = sample();
            record.signing_key = hex::encode([1u8; 16]);
            assert!(record.identity().is_err());
        }

        #[test]
        fn debug_omits_signing_key() {
            let (_, _, record) = sample();
            assert!(!format!("{:?}", record).contains(&record.signing_key));
        }
    }

    mod file_store {
        use super::*;

        #[test]
        fn load_missing_file_is_empty() {
            let dir = tempdir().unwrap();
            let store = FilePairingStore::new(dir.path().join("pairing.json"));
            assert!(store.load_all().unwrap().is_empty());
            assert!(store.load("AA:BB:CC:DD:EE:FF").unwrap().is_none());
        }

        #[test]
        fn save_and_load_roundtrip() {
            let dir = tempdir().unwrap();
            let store = FilePairingStore::new(dir.path().join("nested/pairing.json"));
            let (_, _, record) = sample();

            store.save(&record).unwrap();
            assert_eq!(store.load(&record.peer_id).unwrap(), Some(record.clone()));
            assert_eq!(store.load_all().unwrap(), vec![record]);
        }

        #[test]
        fn records_are_keyed_by_accessory() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("pairing.json");
            let store = FilePairingStore::new(&path);
            let (_, _, lamp) = sample_for("AA:BB:CC:DD:EE:FF");
            let (_, _, fan) = sample_for("11:22:33:44:55:66");

            store.save(&lamp).unwrap();
            store.save(&fan).unwrap();
            assert_eq!(store.load(&lamp.peer_id).unwrap(), Some(lamp.clone()));
            assert_eq!(store.load(&fan.peer_id).unwrap(), Some(fan.clone()));

            // A fresh store over the same file sees both.
            let reopened = FilePairingStore::new(&path);
            assert_eq!(reopened.load_all().unwrap(), vec![fan.clone(), lamp.clone()]);

            let on_disk: serde_json::Value =
                serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
            assert_eq!(on_disk["AA:BB:CC:DD:EE:FF"]["peer_id"], "AA:BB:CC:DD:EE:FF");
            assert_eq!(on_disk["11:22:33:44:55:66"]["peer_id"], "11:22:33:44:55:66");
        }

        #[test]
        fn save_replaces_record_for_same_accessory() {
            let dir = tempdir().unwrap();
            let store = FilePairingStore::new(dir.path().join("pairing.json"));
            let (_, _, first) = sample();
            let (_, _, second) = sample();

            store.save(&first).unwrap();
            store.save(&second).unwrap();
            assert_eq!(store.load_all().unwrap(), vec![second]);
        }

        #[test]
        fn remove_forgets_only_that_accessory() {
            let dir = tempdir().unwrap();
            let store = FilePairingStore::new(dir.path().join("pairing.json"));
            let (_, _, lamp) = sample_for("AA:BB:CC:DD:EE:FF");
            let (_, _, fan) = sample_for("11:22:33:44:55:66");
            store.save(&lamp).unwrap();
            store.save(&fan).unwrap();

            store.remove(&lamp.peer_id).unwrap();
            assert!(store.load(&lamp.peer_id).unwrap().is_none());
            assert_eq!(store.load(&fan.peer_id).unwrap(), Some(fan));
            // Removing twice is fine.
            store.remove(&lamp.peer_id).unwrap();
        }

        #[test]
        fn corrupt_file_is_json_error() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("pairing.json");
            std::fs::write(&path, "{not json").unwrap();
            let store = FilePairingStore::new(path);
            assert!(matches!(store.load_all(), Err(Error::Json(_))));
        }
    }

    mod memory_store {
        use super::*;

        #[test]
        fn starts_empty_and_keeps_one_record_per_accessory() {
            let store = MemoryPairingStore::new();
            assert!(store.load_all().unwrap().is_empty());

            let (_, _, first) = sample();
            let (_, _, second) = sample();
            let (_, _, other) = sample_for("11:22:33:44:55:66");
            store.save(&first).unwrap();
            store.save(&second).unwrap();
            store.save(&other).unwrap();
            assert_eq!(store.load(&second.peer_id).unwrap(), Some(second.clone()));
            assert_eq!(store.load_all().unwrap().len(), 2);

            store.remove(&second.peer_id).unwrap();
            assert_eq!(store.load_all().unwrap(), vec![other]);
        }

        #[test]
        fn with_record_preloads_it() {
            let (_, _, record) = sample();
            let store = MemoryPairingStore::with_record(record.clone());
            assert_eq!(store.load(&record.peer_id).unwrap(), Some(record));
        }
    }

    mod mock_store {
        use super::*;

        #[test]
        fn mock_returns_configured_record() {
            let (_, _, record) = sample();
            let expected = record.clone();

            let mut mock = MockPairingStore::new();
            mock.expect_load().times(1).returning(move |peer_id| {
                assert_eq!(peer_id, "AA:BB:CC:DD:EE:FF");
                Ok(Some(record.clone()))
            });

            assert_eq!(mock.load("AA:BB:CC:DD:EE:FF").unwrap(), Some(expected));
        }
    }
}
