//! Remote injection.
//!
//! The sequence is strictly ordered: resolve the loader routine, open the
//! target, allocate, write the payload path, fire a remote thread at
//! `LoadLibraryA`, free, close. Later steps depend on the exact address the
//! allocation step returned, so nothing here may be reordered. Every
//! resource acquired along the way is released on every exit path, in
//! reverse acquisition order.
//!
//! Success means every call in the chain succeeded, that is, the remote
//! load was *requested*. Whether the payload initialized is never
//! confirmed here; the payload reports back over the control channel if
//! it wants to.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::process::ProcessScan;

/// One stable code per failure point, `0` reserved for success. Callers
/// retry by re-invoking the whole operation; no step retries internally.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InjectError {
    #[error("target process is not running")]
    ProcessDiscovery,
    #[error("target module is not loaded")]
    ModuleDiscovery,
    #[error("payload path could not be resolved")]
    PayloadResolution,
    #[error("system loader library is unavailable")]
    LoaderLibrary,
    #[error("loader routine is not exported")]
    LoaderRoutine,
    #[error("failed to open the target process")]
    OpenTarget,
    #[error("remote allocation failed")]
    RemoteAllocation,
    #[error("remote write failed")]
    RemoteWrite,
    #[error("remote thread creation failed")]
    RemoteThread,
    #[error("remote free failed")]
    RemoteFree,
}

impl InjectError {
    /// The exit-code taxonomy surfaced to callers. Stable; new failure
    /// points get new codes, existing codes never move.
    pub fn code(&self) -> u8 {
        match self {
            InjectError::ProcessDiscovery => 1,
            InjectError::ModuleDiscovery => 2,
            InjectError::PayloadResolution => 3,
            InjectError::LoaderLibrary => 4,
            InjectError::LoaderRoutine => 5,
            InjectError::OpenTarget => 6,
            InjectError::RemoteAllocation => 7,
            InjectError::RemoteWrite => 8,
            InjectError::RemoteThread => 9,
            InjectError::RemoteFree => 10,
        }
    }
}

/// The two heuristic waits in the injection sequence. Neither is a
/// synchronization primitive: the target cannot be modified to signal
/// readiness, so these stand in for "the target finished initializing" and
/// "the remote thread has read its argument".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InjectDelays {
    pub startup: Duration,
    pub handoff: Duration,
}

/// Gate injection on discovery: the target process must be running and the
/// target module mapped. Snapshot failures and absent targets collapse into
/// the discovery codes; the distinction is logged, not surfaced.
pub fn locate_target(
    scan: &dyn ProcessScan,
    process_name: &str,
    module_name: &str,
) -> Result<u32, InjectError> {
    let pid = match scan.find_process(process_name) {
        Ok(Some(pid)) => pid,
        Ok(None) => {
            debug!(process = process_name, "target process not running");
            return Err(InjectError::ProcessDiscovery);
        }
        Err(e) => {
            warn!("process discovery failed: {e}");
            return Err(InjectError::ProcessDiscovery);
        }
    };

    match scan.module_base(pid, module_name) {
        Ok(Some(base)) => {
            debug!(pid, base = format_args!("{base:#x}"), "target module mapped");
            Ok(pid)
        }
        Ok(None) => {
            debug!(module = module_name, "target module not mapped");
            Err(InjectError::ModuleDiscovery)
        }
        Err(e) => {
            warn!("module discovery failed: {e}");
            Err(InjectError::ModuleDiscovery)
        }
    }
}

#[cfg(target_os = "windows")]
mod remote {
    use std::ffi::c_void;
    use std::thread;

    use tracing::{debug, info, warn};
    use windows::Win32::Foundation::{CloseHandle, HANDLE};
    use windows::Win32::System::Diagnostics::Debug::WriteProcessMemory;
    use windows::Win32::System::LibraryLoader::{GetModuleHandleA, GetProcAddress};
    use windows::Win32::System::Memory::{
        MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE, VirtualAllocEx, VirtualFreeEx,
    };
    use windows::Win32::System::Threading::{
        CreateRemoteThread, OpenProcess, PROCESS_CREATE_THREAD, PROCESS_QUERY_INFORMATION,
        PROCESS_VM_OPERATION, PROCESS_VM_READ, PROCESS_VM_WRITE,
    };
    use windows::core::s;

    use super::{InjectDelays, InjectError};
    use crate::config::Config;
    use crate::payload::PayloadDescriptor;
    use crate::process::ProcessScan;

    /// Target process handle, closed exactly once when dropped.
    struct OwnedProcess {
        raw: HANDLE,
    }

    impl OwnedProcess {
        /// Minimal rights for the remote sequence: create a thread, drive
        /// its virtual memory, query basic information.
        fn open(pid: u32) -> windows::core::Result<Self> {
            // SAFETY: no preconditions; the returned handle is owned here.
            let raw = unsafe {
                OpenProcess(
                    PROCESS_CREATE_THREAD
                        | PROCESS_QUERY_INFORMATION
                        | PROCESS_VM_OPERATION
                        | PROCESS_VM_READ
                        | PROCESS_VM_WRITE,
                    false,
                    pid,
                )
            }?;
            Ok(Self { raw })
        }

        fn raw(&self) -> HANDLE {
            self.raw
        }
    }

    impl Drop for OwnedProcess {
        fn drop(&mut self) {
            // SAFETY: raw is owned by this struct and closed once.
            if let Err(e) = unsafe { CloseHandle(self.raw) } {
                warn!("failed to close target process handle: {e}");
            }
        }
    }

    /// Memory owned by us inside the target's address space. The region
    /// must never outlive the process handle it was allocated through,
    /// which the borrow enforces. Freed on every exit path: explicitly via
    /// [`free`](Self::free) on the main path (so a failing free surfaces as
    /// its own error code), by `Drop` on early returns.
    struct RemoteAllocation<'p> {
        process: &'p OwnedProcess,
        addr: *mut c_void,
        released: bool,
    }

    impl<'p> RemoteAllocation<'p> {
        /// Commit a read-write region of exactly `len` bytes.
        fn alloc(process: &'p OwnedProcess, len: usize) -> Option<Self> {
            // SAFETY: process handle is live and has PROCESS_VM_OPERATION.
            let addr = unsafe {
                VirtualAllocEx(
                    process.raw(),
                    None,
                    len,
                    MEM_COMMIT | MEM_RESERVE,
                    PAGE_READWRITE,
                )
            };
            if addr.is_null() {
                return None;
            }
            Some(Self {
                process,
                addr,
                released: false,
            })
        }

        fn addr(&self) -> *mut c_void {
            self.addr
        }

        fn write(&self, bytes: &[u8]) -> windows::core::Result<()> {
            // SAFETY: addr points at a committed region of at least
            // bytes.len() bytes inside the target (alloc sized it so).
            unsafe {
                WriteProcessMemory(
                    self.process.raw(),
                    self.addr,
                    bytes.as_ptr() as *const c_void,
                    bytes.len(),
                    None,
                )
            }
        }

        fn free(mut self) -> windows::core::Result<()> {
            self.released = true;
            // SAFETY: addr was allocated through this process handle and
            // has not been freed yet.
            unsafe { VirtualFreeEx(self.process.raw(), self.addr, 0, MEM_RELEASE) }
        }
    }

    impl Drop for RemoteAllocation<'_> {
        fn drop(&mut self) {
            if self.released {
                return;
            }
            // SAFETY: addr was allocated through this process handle and
            // has not been freed yet.
            if let Err(e) = unsafe { VirtualFreeEx(self.process.raw(), self.addr, 0, MEM_RELEASE) }
            {
                warn!("failed to free remote allocation: {e}");
            }
        }
    }

    /// Run the remote sequence against an already-located pid.
    pub fn inject(
        pid: u32,
        payload: &PayloadDescriptor,
        delays: &InjectDelays,
    ) -> Result<(), InjectError> {
        let arg = payload
            .loader_arg()
            .map_err(|_| InjectError::PayloadResolution)?;
        let arg_bytes = arg.as_bytes_with_nul();

        // The loader routine address resolved in *our* address space is
        // handed to the target verbatim. This is only valid because Windows
        // maps kernel32.dll at one system-chosen base shared by every
        // process in a session; assumed, not verified.
        // SAFETY: no preconditions; the handle is a borrowed mapping.
        let kernel32 = unsafe { GetModuleHandleA(s!("kernel32.dll")) }.map_err(|e| {
            warn!("kernel32.dll is not mapped: {e}");
            InjectError::LoaderLibrary
        })?;
        // SAFETY: kernel32 is a valid module handle.
        let loader = unsafe { GetProcAddress(kernel32, s!("LoadLibraryA")) }
            .ok_or(InjectError::LoaderRoutine)?;

        let process = OwnedProcess::open(pid).map_err(|e| {
            warn!(pid, "failed to open target: {e}");
            InjectError::OpenTarget
        })?;

        debug!(delay_ms = delays.startup.as_millis() as u64, "waiting out target startup");
        thread::sleep(delays.startup);

        let alloc = RemoteAllocation::alloc(&process, arg_bytes.len())
            .ok_or(InjectError::RemoteAllocation)?;

        alloc.write(arg_bytes).map_err(|e| {
            warn!("remote write failed: {e}");
            InjectError::RemoteWrite
        })?;

        // Fire and forget: the remote thread runs LoadLibraryA(path) and is
        // never joined or inspected.
        let routine: unsafe extern "system" fn(*mut c_void) -> u32 =
            // SAFETY: LoadLibraryA takes one pointer argument and returns a
            // module handle, which matches the thread routine ABI.
            unsafe { std::mem::transmute(loader) };
        // SAFETY: process has PROCESS_CREATE_THREAD, routine is a valid
        // address in the target (see the kernel32 note above), and addr
        // points at the written path.
        let thread = unsafe {
            CreateRemoteThread(
                process.raw(),
                None,
                0,
                Some(routine),
                Some(alloc.addr() as *const c_void),
                0,
                None,
            )
        }
        .map_err(|e| {
            warn!("remote thread creation failed: {e}");
            InjectError::RemoteThread
        })?;
        // SAFETY: thread is owned by us; closing it does not affect the
        // running remote thread.
        if let Err(e) = unsafe { CloseHandle(thread) } {
            warn!("failed to close remote thread handle: {e}");
        }

        // Give the remote thread time to read the path before it is freed
        // underneath it.
        thread::sleep(delays.handoff);

        alloc.free().map_err(|e| {
            warn!("remote free failed: {e}");
            InjectError::RemoteFree
        })?;

        info!(pid, payload = %payload.path().display(), "remote load requested");
        Ok(())
    }

    /// The full operation: discovery, payload resolution, remote sequence.
    /// Returns the pid injected into.
    pub fn inject_into_named_target(
        scan: &dyn ProcessScan,
        config: &Config,
    ) -> Result<u32, InjectError> {
        let pid = super::locate_target(scan, &config.target_process, &config.target_module)?;
        let payload = PayloadDescriptor::resolve(&config.payload_file).map_err(|e| {
            warn!("payload resolution failed: {e}");
            InjectError::PayloadResolution
        })?;
        inject(pid, &payload, &config.inject_delays())?;
        Ok(pid)
    }
}

#[cfg(target_os = "windows")]
pub use remote::{inject, inject_into_named_target};

#[cfg(all(test, target_os = "windows"))]
mod windows_tests {
    use std::time::Duration;

    use super::*;
    use crate::payload::PayloadDescriptor;

    #[test]
    fn nonexistent_pid_fails_at_the_open_step() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("syrinx.dll"), b"stub").unwrap();
        let payload = PayloadDescriptor::resolve_in(dir.path(), "syrinx.dll").unwrap();

        let delays = InjectDelays {
            startup: Duration::ZERO,
            handoff: Duration::ZERO,
        };
        // Pids are multiples of 4; this one cannot name a live process.
        let result = inject(0xFFFF_FFF1, &payload, &delays);
        assert_eq!(result, Err(InjectError::OpenTarget));
    }
}
