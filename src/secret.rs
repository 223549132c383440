//! Generation and storage of the pre-shared channel key.
use std::fs::File;
use std::io::prelude::*;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine};
use rand::Rng;

use crate::crypto::KEY_LENGTH;
use crate::error::Error;

/// Generate a fresh channel key: 32 random bytes, Base64-encoded.
pub fn generate_key() -> String {
    let mut key = [0u8; KEY_LENGTH];
    rand::thread_rng().fill(&mut key[..]);

    STANDARD.encode(key)
}

/// Read the shared key from a file.
pub fn read_key(path: &Path) -> Result<String, Error> {
    if !path.exists() {
        return Err(Error::FileNotFound(
            "Key file. Did you initialize the channel key at least once?".into(),
        ));
    }

    let mut file = File::open(path)
        .map_err(|err| Error::IoPathError(path.to_path_buf(), "opening key file", err))?;
    let mut key = String::new();
    file.read_to_string(&mut key)
        .map_err(|err| Error::IoPathError(path.to_path_buf(), "reading key file", err))?;

    Ok(key.trim().to_string())
}

/// Generate a random key and write it to a file, unless one already exists.
pub fn init_key_file(path: &Path) -> Result<(), Error> {
    if path.exists() {
        return Ok(());
    }

    let key = generate_key();
    let mut file = File::create(path)
        .map_err(|err| Error::IoPathError(path.to_path_buf(), "creating key file", err))?;
    file.write_all(key.as_bytes())
        .map_err(|err| Error::IoPathError(path.to_path_buf(), "writing key file", err))?;

    // Set proper file permissions for unix filesystems
    #[cfg(not(target_os = "windows"))]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut permissions = file
            .metadata()
            .map_err(|err| {
                Error::IoPathError(path.to_path_buf(), "reading key file metadata", err)
            })?
            .permissions();
        permissions.set_mode(0o600);
        std::fs::set_permissions(path, permissions).map_err(|err| {
            Error::IoPathError(path.to_path_buf(), "setting key file permissions", err)
        })?;
    }

    Ok(())
}
