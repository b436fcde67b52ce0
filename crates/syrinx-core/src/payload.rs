//! Payload location.
//!
//! The payload DLL ships next to the loader executable. Its absolute path is
//! computed once per injection attempt and never mutated afterwards; the
//! target's loader resolves the same path, so both sides must see the same
//! filesystem.

use std::ffi::CString;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Absolute path of the module to load into the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadDescriptor {
    path: PathBuf,
}

impl PayloadDescriptor {
    /// Resolve `file_name` against the directory containing our own
    /// executable. Fails if the file is not there, since a path the
    /// target's loader cannot open would only fail later and silently.
    pub fn resolve(file_name: &str) -> Result<Self> {
        let exe = std::env::current_exe()?;
        let dir = exe
            .parent()
            .ok_or_else(|| Error::PayloadMissing(exe.display().to_string()))?;
        Self::resolve_in(dir, file_name)
    }

    /// Same as [`resolve`](Self::resolve) with an explicit base directory.
    pub fn resolve_in(dir: &Path, file_name: &str) -> Result<Self> {
        let path = dir.join(file_name);
        if !path.is_file() {
            return Err(Error::PayloadMissing(path.display().to_string()));
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The nul-terminated byte string handed to the remote loader routine.
    pub fn loader_arg(&self) -> Result<CString> {
        let text = self
            .path
            .to_str()
            .ok_or_else(|| Error::PayloadEncoding(self.path.display().to_string()))?;
        CString::new(text).map_err(|_| Error::PayloadEncoding(self.path.display().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn resolves_a_file_next_to_the_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("syrinx.dll"), b"stub").unwrap();

        let payload = PayloadDescriptor::resolve_in(dir.path(), "syrinx.dll").unwrap();
        assert_eq!(payload.path(), dir.path().join("syrinx.dll"));
    }

    #[test]
    fn missing_payload_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = PayloadDescriptor::resolve_in(dir.path(), "syrinx.dll");
        assert!(matches!(result, Err(Error::PayloadMissing(_))));
    }

    #[test]
    fn loader_arg_is_nul_terminated() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("syrinx.dll"), b"stub").unwrap();

        let payload = PayloadDescriptor::resolve_in(dir.path(), "syrinx.dll").unwrap();
        let arg = payload.loader_arg().unwrap();
        let bytes = arg.as_bytes_with_nul();
        assert_eq!(bytes.last(), Some(&0));
        assert_eq!(bytes.len(), payload.path().to_str().unwrap().len() + 1);
    }
}
