use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::attendance::StudentId;
use crate::errors::SignatureStoreError;
use crate::faces::signature::FaceSignature;

const SIGNATURE_DIR: &str = "signatures";
const SIGNATURE_EXTENSION: &str = "sig";

/// Enrolled signatures as raw little-endian bytes, one file per student.
#[derive(Debug, Clone)]
pub struct FilesystemSignatureStore {
    root: PathBuf,
}

impl FilesystemSignatureStore {
    pub fn new(store_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: store_dir.into().join(SIGNATURE_DIR),
        }
    }

    pub fn path_for(&self, student: &StudentId) -> PathBuf {
        self.root.join(format!("{}.{SIGNATURE_EXTENSION}", student.as_str()))
    }

    /// Returns `None` when the student never enrolled.
    pub fn load(&self, student: &StudentId) -> Result<Option<Vec<u8>>, SignatureStoreError> {
        let path = self.path_for(student);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(SignatureStoreError::Read { path, source }),
        }
    }

    /// Replaces any previous enrollment atomically.
    pub fn save(
        &self,
        student: &StudentId,
        signature: &FaceSignature,
    ) -> Result<PathBuf, SignatureStoreError> {
        let path = self.path_for(student);
        write_atomically(&path, &signature.to_bytes()).map_err(|source| {
            SignatureStoreError::Write {
                path: path.clone(),
                source,
            }
        })?;
        Ok(path)
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        writer.write_all(bytes)?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;

    let file = tmp.persist(path).map_err(|err| err.error)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = file.metadata()?.permissions();
        perms.set_mode(0o600);
        file.set_permissions(perms)?;
    }
    #[cfg(not(unix))]
    drop(file);

    Ok(())
}
