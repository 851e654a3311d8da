use std::{
    fs::{self, DirBuilder, OpenOptions},
    io::{self, Write},
    net::IpAddr,
    os::unix::fs::{DirBuilderExt, OpenOptionsExt},
    path::{Path, PathBuf},
};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    error::{PluginError, PluginResult},
    network::mac::MacAddress,
};

/// File layout looks like this
/// $dataDir/
///         - $network/$containerID -> {"ip": "...", "mac": "..."}

const DIR_MODE: u32 = 0o755;
const FILE_MODE: u32 = 0o644;

/// macro to quickly wrap the IO error with useful context
/// First argument is the call, second the container id, third the operation.
/// The full error is "$op entry for container $id: $org_error"
macro_rules! store_err {
    ($call:expr, $id:expr, $op:expr) => {
        $call.map_err(|err| {
            PluginError::wrap(format!("{} entry for container {}", $op, $id), err.into())
        })
    };
}

/// Last known allocation of one container on one network.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreEntry {
    pub ip: IpAddr,
    pub mac: MacAddress,
}

/// Entries of a single network, one file per container.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

fn remove_file_ignore_enoent<P: AsRef<Path>>(path: P) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(ok) => Ok(ok),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

impl FileStore {
    /// Open the store for the network, the directory is created when missing.
    pub fn new<P: AsRef<Path>>(data_dir: P, network: &str) -> PluginResult<FileStore> {
        let dir = data_dir.as_ref().join(network);
        DirBuilder::new()
            .recursive(true)
            .mode(DIR_MODE)
            .create(&dir)
            .map_err(|err| {
                PluginError::wrap(
                    format!("create store directory {:?}", dir.display()),
                    err.into(),
                )
            })?;
        Ok(FileStore { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, container_id: &str) -> PathBuf {
        self.dir.join(container_id)
    }

    /// Read the entry, returns None when the container was never stored.
    pub fn load(&self, container_id: &str) -> PluginResult<Option<StoreEntry>> {
        let path = self.entry_path(container_id);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(PluginError::wrap(
                    format!("load entry for container {container_id}"),
                    err.into(),
                ))
            }
        };
        let entry: StoreEntry =
            store_err!(serde_json::from_slice(&data), container_id, "decode")?;
        debug!("Loaded entry for container {container_id}: {entry:?}");
        Ok(Some(entry))
    }

    /// Overwrite the entry with a single truncating write.
    pub fn save(&self, container_id: &str, ip: IpAddr, mac: MacAddress) -> PluginResult<()> {
        let entry = StoreEntry { ip, mac };
        let data = store_err!(serde_json::to_vec_pretty(&entry), container_id, "encode")?;

        let mut file = store_err!(
            OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(FILE_MODE)
                .open(self.entry_path(container_id)),
            container_id,
            "save"
        )?;
        store_err!(file.write_all(&data), container_id, "save")?;
        debug!("Saved entry for container {container_id}: {entry:?}");
        Ok(())
    }

    /// Remove the entry, a missing entry is not an error.
    pub fn delete(&self, container_id: &str) -> PluginResult<()> {
        store_err!(
            remove_file_ignore_enoent(self.entry_path(container_id)),
            container_id,
            "delete"
        )
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;
    use crate::network::constants;

    fn tmp_store() -> (tempfile::TempDir, FileStore) {
        let tmpdir = tempfile::Builder::new()
            .prefix("stable-ipam-store")
            .tempdir()
            .unwrap();
        let store = FileStore::new(tmpdir.path(), "vmnet").unwrap();
        (tmpdir, store)
    }

    #[test]
    fn test_save_load() {
        let (_tmp, store) = tmp_store();
        let mac: MacAddress = "02:42:ac:11:00:05".parse().unwrap();
        let ip: IpAddr = "10.0.0.5".parse().unwrap();

        assert_eq!(store.load("abc").unwrap(), None);

        store.save("abc", ip, mac).unwrap();
        assert_eq!(store.load("abc").unwrap(), Some(StoreEntry { ip, mac }));

        let raw: serde_json::Value =
            serde_json::from_slice(&fs::read(store.dir().join("abc")).unwrap()).unwrap();
        assert_eq!(
            raw,
            serde_json::json!({"ip": "10.0.0.5", "mac": "02:42:ac:11:00:05"})
        );
    }

    #[test]
    fn test_save_overwrites() {
        let (_tmp, store) = tmp_store();
        let mac: MacAddress = "02:42:ac:11:00:05".parse().unwrap();

        store.save("abc", "10.0.0.5".parse().unwrap(), mac).unwrap();
        store.save("abc", "10.0.0.9".parse().unwrap(), mac).unwrap();
        assert_eq!(
            store.load("abc").unwrap().unwrap().ip,
            "10.0.0.9".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn test_permissions() {
        let (_tmp, store) = tmp_store();
        store
            .save("abc", "10.0.0.5".parse().unwrap(), MacAddress::random())
            .unwrap();

        let dir_mode = fs::metadata(store.dir()).unwrap().permissions().mode();
        let file_mode = fs::metadata(store.dir().join("abc"))
            .unwrap()
            .permissions()
            .mode();
        // the umask can only take bits away
        assert_eq!(dir_mode & !DIR_MODE & 0o777, 0);
        assert_eq!(file_mode & !FILE_MODE & 0o777, 0);
    }

    #[test]
    fn test_delete_idempotent() {
        let (_tmp, store) = tmp_store();
        store
            .save("abc", "10.0.0.5".parse().unwrap(), MacAddress::random())
            .unwrap();
        store.delete("abc").unwrap();
        assert_eq!(store.load("abc").unwrap(), None);
        store.delete("abc").unwrap();
    }

    #[test]
    fn test_new_is_idempotent() {
        let (tmp, store) = tmp_store();
        let again = FileStore::new(tmp.path(), "vmnet").unwrap();
        assert_eq!(store.dir(), again.dir());
    }

    #[test]
    fn test_load_corrupt_entry() {
        let (_tmp, store) = tmp_store();
        fs::write(store.dir().join("abc"), "{\"ip\":").unwrap();
        let err = store.load("abc").expect_err("corrupt entry");
        assert!(err.to_string().contains("container abc"), "{err}");
        assert_eq!(err.code(), constants::CNI_ERR_DECODE);
    }
}
