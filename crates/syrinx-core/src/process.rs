//! Process and module discovery via toolhelp snapshots.
//!
//! Both lookups share the same rules: the comparison is byte-exact and
//! case-sensitive, and when several entries carry the same name the *last*
//! one enumerated wins. Callers that need "first match" semantics do not
//! get them here.

use crate::error::Result;

/// Discovery as the injector consumes it. The only production
/// implementation is [`ToolhelpScan`]; tests substitute scripted scans.
pub trait ProcessScan {
    /// Pid of the last running process whose executable name equals `name`.
    fn find_process(&self, name: &str) -> Result<Option<u32>>;

    /// Base address of the last module named `name` loaded in `pid`.
    ///
    /// Only meaningful inside that process's address space; this crate uses
    /// it purely as a "module is mapped" gate.
    fn module_base(&self, pid: u32, name: &str) -> Result<Option<usize>>;
}

/// Decode a fixed-size nul-terminated UTF-16 name field.
pub fn wide_name(buf: &[u16]) -> String {
    let len = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    String::from_utf16_lossy(&buf[..len])
}

/// Walk every entry, keep the last whose name matches `target` exactly.
pub fn last_exact_match<T, I>(entries: I, target: &str) -> Option<T>
where
    I: Iterator<Item = (String, T)>,
{
    let mut found = None;
    for (name, value) in entries {
        if name == target {
            found = Some(value);
        }
    }
    found
}

#[cfg(target_os = "windows")]
mod toolhelp {
    use tracing::warn;
    use windows::Win32::Foundation::{CloseHandle, HANDLE};
    use windows::Win32::System::Diagnostics::ToolHelp::{
        CreateToolhelp32Snapshot, MODULEENTRY32W, Module32FirstW, Module32NextW, PROCESSENTRY32W,
        Process32FirstW, Process32NextW, TH32CS_SNAPMODULE, TH32CS_SNAPMODULE32,
        TH32CS_SNAPPROCESS,
    };

    use super::{ProcessScan, last_exact_match, wide_name};
    use crate::error::{Error, Result};

    /// Owning iterator over a process snapshot. The snapshot handle is
    /// closed when the iterator drops, on every path.
    struct ProcessIter {
        snapshot: HANDLE,
        entry: Option<PROCESSENTRY32W>,
    }

    impl ProcessIter {
        fn new() -> windows::core::Result<Self> {
            // SAFETY: no preconditions; returns an owned snapshot handle.
            let snapshot = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) }?;

            let mut entry = PROCESSENTRY32W {
                dwSize: std::mem::size_of::<PROCESSENTRY32W>() as u32,
                ..Default::default()
            };

            // SAFETY: snapshot is valid and entry carries the correct dwSize.
            if let Err(e) = unsafe { Process32FirstW(snapshot, &mut entry) } {
                // SAFETY: snapshot was returned owned by this function.
                let _ = unsafe { CloseHandle(snapshot) };
                return Err(e);
            }

            Ok(Self {
                snapshot,
                entry: Some(entry),
            })
        }
    }

    impl Iterator for ProcessIter {
        type Item = (String, u32);

        fn next(&mut self) -> Option<Self::Item> {
            let entry = self.entry.take()?;

            let mut next = entry;
            // SAFETY: snapshot is valid, next is a properly sized entry.
            if unsafe { Process32NextW(self.snapshot, &mut next) }.is_ok() {
                self.entry = Some(next);
            }

            Some((wide_name(&entry.szExeFile), entry.th32ProcessID))
        }
    }

    impl Drop for ProcessIter {
        fn drop(&mut self) {
            // SAFETY: snapshot is owned by this iterator and closed once.
            if let Err(e) = unsafe { CloseHandle(self.snapshot) } {
                warn!("failed to close process snapshot: {e}");
            }
        }
    }

    /// Owning iterator over the modules loaded in one process.
    struct ModuleIter {
        snapshot: HANDLE,
        entry: Option<MODULEENTRY32W>,
    }

    impl ModuleIter {
        fn new(pid: u32) -> windows::core::Result<Self> {
            // SAFETY: no preconditions; returns an owned snapshot handle.
            let snapshot =
                unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPMODULE | TH32CS_SNAPMODULE32, pid) }?;

            let mut entry = MODULEENTRY32W {
                dwSize: std::mem::size_of::<MODULEENTRY32W>() as u32,
                ..Default::default()
            };

            // SAFETY: snapshot is valid and entry carries the correct dwSize.
            if let Err(e) = unsafe { Module32FirstW(snapshot, &mut entry) } {
                // SAFETY: snapshot was returned owned by this function.
                let _ = unsafe { CloseHandle(snapshot) };
                return Err(e);
            }

            Ok(Self {
                snapshot,
                entry: Some(entry),
            })
        }
    }

    impl Iterator for ModuleIter {
        type Item = (String, usize);

        fn next(&mut self) -> Option<Self::Item> {
            let entry = self.entry.take()?;

            let mut next = entry;
            // SAFETY: snapshot is valid, next is a properly sized entry.
            if unsafe { Module32NextW(self.snapshot, &mut next) }.is_ok() {
                self.entry = Some(next);
            }

            Some((wide_name(&entry.szModule), entry.modBaseAddr as usize))
        }
    }

    impl Drop for ModuleIter {
        fn drop(&mut self) {
            // SAFETY: snapshot is owned by this iterator and closed once.
            if let Err(e) = unsafe { CloseHandle(self.snapshot) } {
                warn!("failed to close module snapshot: {e}");
            }
        }
    }

    /// Pid of the last running process named `name`, or `None`.
    pub fn find_process_by_name(name: &str) -> Result<Option<u32>> {
        let iter = ProcessIter::new().map_err(|e| Error::SnapshotFailed(e.to_string()))?;
        Ok(last_exact_match(iter, name))
    }

    /// Base address of the last module named `name` in `pid`, or `None`.
    pub fn find_module_base(pid: u32, name: &str) -> Result<Option<usize>> {
        let iter = ModuleIter::new(pid).map_err(|e| Error::SnapshotFailed(e.to_string()))?;
        Ok(last_exact_match(iter, name))
    }

    /// Toolhelp-backed [`ProcessScan`].
    pub struct ToolhelpScan;

    impl ProcessScan for ToolhelpScan {
        fn find_process(&self, name: &str) -> Result<Option<u32>> {
            find_process_by_name(name)
        }

        fn module_base(&self, pid: u32, name: &str) -> Result<Option<usize>> {
            find_module_base(pid, name)
        }
    }
}

#[cfg(target_os = "windows")]
pub use toolhelp::{ToolhelpScan, find_module_base, find_process_by_name};

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(names: &[(&str, u32)]) -> impl Iterator<Item = (String, u32)> {
        names
            .iter()
            .map(|(n, v)| (n.to_string(), *v))
            .collect::<Vec<_>>()
            .into_iter()
    }

    #[test]
    fn no_match_yields_none() {
        let found = last_exact_match(entries(&[("explorer.exe", 4), ("svchost.exe", 8)]), "game.exe");
        assert_eq!(found, None);
    }

    #[test]
    fn duplicates_resolve_to_the_last_entry() {
        let found = last_exact_match(
            entries(&[("game.exe", 100), ("other.exe", 200), ("game.exe", 300)]),
            "game.exe",
        );
        assert_eq!(found, Some(300));
    }

    #[test]
    fn matching_is_case_sensitive_and_exact() {
        let listed = entries(&[("Game.exe", 1), ("game.exe.bak", 2), ("mygame.exe", 3)]);
        assert_eq!(last_exact_match(listed, "game.exe"), None);
    }

    #[test]
    fn empty_snapshot_yields_none() {
        assert_eq!(last_exact_match(entries(&[]), "game.exe"), None);
    }

    #[test]
    fn wide_name_stops_at_the_terminator() {
        let mut buf = [0u16; 8];
        for (i, b) in "abc".encode_utf16().enumerate() {
            buf[i] = b;
        }
        buf[5] = u16::from(b'x');
        assert_eq!(wide_name(&buf), "abc");
    }

    #[test]
    fn wide_name_handles_a_full_buffer() {
        let buf: Vec<u16> = "abcd".encode_utf16().collect();
        assert_eq!(wide_name(&buf), "abcd");
    }
}
