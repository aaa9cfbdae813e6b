//! Software-encrypted file-backed secure item service.
//!
//! Fallback for hosts without an OS secure store. Every item is sealed into
//! its own file with XChaCha20-Poly1305; the sealing key is a random master
//! key wrapped under a host-derived key and stored beside the items.
//!
//! # Layout
//!
//! ```text
//! <root>/
//! ├── master.key            host-wrapped master key, mode 0600 on Unix
//! ├── store.lock            lock file serializing mutations
//! └── items/<digest>.item   sealed records, one per (service, account)
//! ```
//!
//! # Sealing
//!
//! Records are CBOR-encoded, then sealed with a 24-byte random nonce
//! prepended to the ciphertext. The associated data binds the sealed blob to
//! its `(service, account)` identity, so a blob copied onto another item's
//! path fails authentication.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretBox};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::query::{AccessControl, Accessibility, ItemAttributes, ItemQuery};
use crate::status::{OsStatus, ServiceError};

use super::{check_protected_access, ItemMatch, SecureItemService, StoreLock};

const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 24;
const TAG_SIZE: usize = 16;

/// Domain separation for sealed item records.
const ITEM_SEAL_CONTEXT: &[u8] = b"vaultkit:item-seal";
/// Domain separation for item file names.
const ITEM_ID_CONTEXT: &[u8] = b"vaultkit:item-id";
/// Domain separation for the wrapped master key.
const MASTER_KEY_CONTEXT: &[u8] = b"vaultkit:master-key-wrap";
/// Salt mixed into the host-derived wrapping key. Changing it orphans every
/// previously wrapped master key.
const HOST_KEY_SALT: &[u8] = b"vaultkit:host-key:v1";

const MASTER_KEY_FILE: &str = "master.key";
const LOCK_FILE: &str = "store.lock";
const ITEMS_DIR: &str = "items";

/// Accessibility recorded when an insert does not specify one.
const DEFAULT_ACCESSIBILITY: Accessibility = Accessibility::WhenUnlocked;

#[derive(Serialize, Deserialize)]
struct ItemRecord {
    service: String,
    account: String,
    accessibility: Accessibility,
    protected: bool,
    payload: Vec<u8>,
}

/// File-backed implementation of [`SecureItemService`].
///
/// Two instances opened on the same root address the same items; mutations
/// are serialized across processes through [`StoreLock`].
#[derive(Debug)]
pub struct EncryptedFileService {
    root: PathBuf,
    items_dir: PathBuf,
    master_key: SecretBox<[u8; KEY_SIZE]>,
    lock: StoreLock,
}

impl EncryptedFileService {
    /// Opens (or initializes) the service rooted at `root`.
    ///
    /// # Errors
    ///
    /// Fails when the directory layout cannot be created or the master key
    /// cannot be loaded or provisioned.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, ServiceError> {
        let root = root.as_ref().to_path_buf();
        let items_dir = root.join(ITEMS_DIR);
        fs::create_dir_all(&items_dir)
            .map_err(|err| io_error("create service directories", &err))?;
        let lock = StoreLock::open(&root.join(LOCK_FILE))?;
        let master_key = load_or_create_master_key(&root)?;
        Ok(Self {
            root,
            items_dir,
            master_key,
            lock,
        })
    }

    /// Directory the service stores its files under.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn item_path(&self, service: &str, account: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(ITEM_ID_CONTEXT);
        hasher.update([0x1f]);
        hasher.update(service.as_bytes());
        hasher.update([0x1f]);
        hasher.update(account.as_bytes());
        self.items_dir
            .join(format!("{}.item", hex::encode(hasher.finalize())))
    }

    fn read_record(
        &self,
        path: &Path,
        aad: &[u8],
    ) -> Result<Option<ItemRecord>, ServiceError> {
        let blob = match fs::read(path) {
            Ok(blob) => blob,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_error("read item file", &err)),
        };
        let bytes = Zeroizing::new(open_sealed(
            self.master_key.expose_secret(),
            aad,
            &blob,
        )?);
        let record = ciborium::de::from_reader(bytes.as_slice()).map_err(|err| {
            ServiceError::with_description(
                OsStatus::DECODE,
                format!("decode item record: {err}"),
            )
        })?;
        Ok(Some(record))
    }

    fn write_record(
        &self,
        path: &Path,
        aad: &[u8],
        record: &ItemRecord,
    ) -> Result<(), ServiceError> {
        let mut bytes = Zeroizing::new(Vec::new());
        ciborium::ser::into_writer(record, &mut *bytes).map_err(|err| {
            ServiceError::with_description(
                OsStatus::PARAM,
                format!("encode item record: {err}"),
            )
        })?;
        let blob = seal(self.master_key.expose_secret(), aad, &bytes)?;
        write_atomic(path, &blob)
    }
}

fn item_aad(service: &str, account: &str) -> Vec<u8> {
    [ITEM_SEAL_CONTEXT, service.as_bytes(), account.as_bytes()].join(&0x1f_u8)
}

impl SecureItemService for EncryptedFileService {
    fn copy_matching(&self, query: &ItemQuery) -> Result<ItemMatch, ServiceError> {
        let aad = item_aad(&query.service, &query.account);
        let path = self.item_path(&query.service, &query.account);
        let Some(record) = self.read_record(&path, &aad)? else {
            return Err(ServiceError::new(OsStatus::ITEM_NOT_FOUND));
        };
        check_protected_access(record.protected, query)?;
        let attributes = query.return_attributes.then(|| ItemAttributes {
            service: record.service.clone(),
            account: record.account.clone(),
            accessibility: record.accessibility,
            protected: record.protected,
        });
        let payload = query.return_data.then(|| record.payload.clone());
        Ok(ItemMatch {
            attributes,
            payload,
        })
    }

    fn add(&self, query: &ItemQuery) -> Result<(), ServiceError> {
        let Some(payload) = query.payload.as_deref() else {
            return Err(ServiceError::with_description(
                OsStatus::PARAM,
                "insert query carries no payload",
            ));
        };
        let _guard = self.lock.lock()?;
        let path = self.item_path(&query.service, &query.account);
        if path.exists() {
            return Err(ServiceError::new(OsStatus::DUPLICATE_ITEM));
        }
        let record = ItemRecord {
            service: query.service.clone(),
            account: query.account.clone(),
            accessibility: query.access_control.map_or_else(
                || query.accessibility.unwrap_or(DEFAULT_ACCESSIBILITY),
                AccessControl::accessibility,
            ),
            protected: query
                .access_control
                .is_some_and(AccessControl::requires_user_presence),
            payload: payload.to_vec(),
        };
        self.write_record(&path, &item_aad(&query.service, &query.account), &record)
    }

    fn update(&self, query: &ItemQuery, payload: &[u8]) -> Result<(), ServiceError> {
        let _guard = self.lock.lock()?;
        let aad = item_aad(&query.service, &query.account);
        let path = self.item_path(&query.service, &query.account);
        let Some(mut record) = self.read_record(&path, &aad)? else {
            return Err(ServiceError::new(OsStatus::ITEM_NOT_FOUND));
        };
        check_protected_access(record.protected, query)?;
        record.payload = payload.to_vec();
        self.write_record(&path, &aad, &record)
    }

    fn delete(&self, query: &ItemQuery) -> Result<(), ServiceError> {
        let _guard = self.lock.lock()?;
        let aad = item_aad(&query.service, &query.account);
        let path = self.item_path(&query.service, &query.account);
        let Some(record) = self.read_record(&path, &aad)? else {
            return Err(ServiceError::new(OsStatus::ITEM_NOT_FOUND));
        };
        check_protected_access(record.protected, query)?;
        fs::remove_file(&path).map_err(|err| io_error("delete item file", &err))?;
        sync_dir(&self.items_dir)
    }
}

// Master key handling

fn load_or_create_master_key(
    root: &Path,
) -> Result<SecretBox<[u8; KEY_SIZE]>, ServiceError> {
    let path = root.join(MASTER_KEY_FILE);
    let wrapping = Zeroizing::new(host_wrapping_key());
    match fs::read(&path) {
        Ok(blob) => unwrap_master_key(&wrapping, &blob),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            create_master_key(&wrapping, &path)
        }
        Err(err) => Err(io_error("read master key", &err)),
    }
}

fn create_master_key(
    wrapping: &[u8; KEY_SIZE],
    path: &Path,
) -> Result<SecretBox<[u8; KEY_SIZE]>, ServiceError> {
    let mut key = Box::new([0_u8; KEY_SIZE]);
    OsRng.fill_bytes(&mut *key);
    let blob = seal(wrapping, MASTER_KEY_CONTEXT, &*key)?;
    write_atomic(path, &blob)?;
    restrict_permissions(path)?;
    Ok(SecretBox::new(key))
}

fn unwrap_master_key(
    wrapping: &[u8; KEY_SIZE],
    blob: &[u8],
) -> Result<SecretBox<[u8; KEY_SIZE]>, ServiceError> {
    let bytes = Zeroizing::new(open_sealed(wrapping, MASTER_KEY_CONTEXT, blob)?);
    if bytes.len() != KEY_SIZE {
        return Err(ServiceError::with_description(
            OsStatus::DECODE,
            "wrapped master key has invalid length",
        ));
    }
    let mut key = Box::new([0_u8; KEY_SIZE]);
    key.copy_from_slice(&bytes);
    Ok(SecretBox::new(key))
}

/// Derives the key wrapping the on-disk master key from host identity.
///
/// The wrapping key can be reconstructed by anyone with access to the same
/// host account; a platform secure store remains the stronger backend when
/// one exists.
fn host_wrapping_key() -> [u8; KEY_SIZE] {
    let hostname = hostname();
    let username = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown-user".to_string());
    let material = [hostname.as_bytes(), username.as_bytes()].join(&0x1f_u8);

    let hk = Hkdf::<Sha256>::new(Some(HOST_KEY_SALT), &material);
    let mut key = [0_u8; KEY_SIZE];
    hk.expand(MASTER_KEY_CONTEXT, &mut key)
        .expect("wrapping key length is valid");
    key
}

fn hostname() -> String {
    #[cfg(unix)]
    {
        fs::read_to_string("/etc/hostname")
            .map(|s| s.trim().to_string())
            .or_else(|_| std::env::var("HOSTNAME"))
            .or_else(|_| std::env::var("HOST"))
            .unwrap_or_else(|_| "unknown-host".to_string())
    }

    #[cfg(not(unix))]
    {
        std::env::var("COMPUTERNAME")
            .or_else(|_| std::env::var("HOSTNAME"))
            .unwrap_or_else(|_| "unknown-host".to_string())
    }
}

// Sealing primitives

fn seal(
    key: &[u8; KEY_SIZE],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, ServiceError> {
    let cipher =
        XChaCha20Poly1305::new_from_slice(key).expect("sealing key length is valid");
    let mut nonce = [0_u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| ServiceError::with_description(OsStatus::PARAM, "seal failed"))?;

    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn open_sealed(
    key: &[u8; KEY_SIZE],
    aad: &[u8],
    blob: &[u8],
) -> Result<Vec<u8>, ServiceError> {
    if blob.len() < NONCE_SIZE + TAG_SIZE {
        return Err(ServiceError::with_description(
            OsStatus::DECODE,
            "sealed blob too short",
        ));
    }
    let cipher =
        XChaCha20Poly1305::new_from_slice(key).expect("sealing key length is valid");
    let (nonce, ciphertext) = blob.split_at(NONCE_SIZE);
    cipher
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| {
            ServiceError::with_description(
                OsStatus::DECODE,
                "sealed blob failed authentication",
            )
        })
}

// File plumbing

fn io_error(context: &str, err: &std::io::Error) -> ServiceError {
    ServiceError::with_description(OsStatus::IO, format!("{context}: {err}"))
}

/// Writes `bytes` with the write-to-temp-then-rename pattern, so readers see
/// either the old content or the new content, never a partial write.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ServiceError> {
    let Some(parent) = path.parent() else {
        return Err(ServiceError::with_description(
            OsStatus::PARAM,
            "item path has no parent directory",
        ));
    };
    let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
        return Err(ServiceError::with_description(
            OsStatus::PARAM,
            "item path has no file name",
        ));
    };
    let temp = parent.join(format!(".{name}.tmp"));

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp)
        .map_err(|err| io_error("create temporary file", &err))?;
    file.write_all(bytes)
        .map_err(|err| io_error("write temporary file", &err))?;
    file.sync_all()
        .map_err(|err| io_error("sync temporary file", &err))?;
    drop(file);

    fs::rename(&temp, path).map_err(|err| {
        let _ = fs::remove_file(&temp);
        io_error("publish item file", &err)
    })?;
    sync_dir(parent)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<(), ServiceError> {
    File::open(dir)
        .and_then(|file| file.sync_all())
        .map_err(|err| io_error("sync directory", &err))
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<(), ServiceError> {
    Ok(())
}

fn restrict_permissions(path: &Path) -> Result<(), ServiceError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = fs::Permissions::from_mode(0o600);
        fs::set_permissions(path, perms)
            .map_err(|err| io_error("restrict master key permissions", &err))?;
    }
    let _ = path;
    Ok(())
}
