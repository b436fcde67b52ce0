//! Inbound control channel.
//!
//! A single-instance, message-mode named pipe the injected payload pushes
//! short command packets through. One client per endpoint lifetime; there
//! is no reconnect, so a caller that wants a fresh connection creates a
//! fresh endpoint. The channel carries no application protocol: each
//! packet is an opaque unit of at most [`MAX_MESSAGE`] bytes, and only the
//! reported length is valid.

/// Hard upper bound on one packet. Senders writing more than this produce a
/// channel failure, not a split read.
pub const MAX_MESSAGE: usize = 16;

#[cfg(target_os = "windows")]
mod endpoint {
    use std::time::Duration;

    use tracing::{debug, warn};
    use windows::Win32::Foundation::{
        CloseHandle, ERROR_BROKEN_PIPE, ERROR_PIPE_CONNECTED, ERROR_PIPE_LISTENING, HANDLE,
    };
    use windows::Win32::Storage::FileSystem::{PIPE_ACCESS_INBOUND, ReadFile};
    use windows::Win32::System::Pipes::{
        ConnectNamedPipe, CreateNamedPipeW, DisconnectNamedPipe, PIPE_NOWAIT,
        PIPE_READMODE_MESSAGE, PIPE_TYPE_MESSAGE, PeekNamedPipe,
    };
    use windows::core::HSTRING;

    use super::MAX_MESSAGE;
    use crate::error::{Error, Result};
    use crate::signal::Signal;

    /// The server end of the control pipe.
    pub struct ControlChannel {
        handle: HANDLE,
        connected: bool,
    }

    // The handle is only ever used from one thread at a time; the channel
    // as a whole moves into the thread that services it.
    unsafe impl Send for ControlChannel {}

    impl ControlChannel {
        /// Create `\\.\pipe\<name>`: inbound only, message type and read
        /// mode, exactly one instance, 16-byte buffers either way.
        ///
        /// Non-blocking pipe mode is what keeps `accept_once` and
        /// `receive` interruptible; both poll instead of parking inside
        /// the kernel.
        pub fn create(name: &str) -> Result<Self> {
            let full_name = HSTRING::from(format!(r"\\.\pipe\{name}"));

            // SAFETY: no preconditions; the returned handle is owned here.
            let handle = unsafe {
                CreateNamedPipeW(
                    &full_name,
                    PIPE_ACCESS_INBOUND,
                    PIPE_TYPE_MESSAGE | PIPE_READMODE_MESSAGE | PIPE_NOWAIT,
                    1,
                    MAX_MESSAGE as u32,
                    MAX_MESSAGE as u32,
                    0,
                    None,
                )
            };
            if handle.is_invalid() {
                return Err(Error::ChannelCreate(
                    windows::core::Error::from_win32().to_string(),
                ));
            }

            debug!(pipe = name, "control channel endpoint created");
            Ok(Self {
                handle,
                connected: false,
            })
        }

        /// Wait for the one client this endpoint will ever serve.
        ///
        /// Returns `Ok(true)` once a client is connected, `Ok(false)` if
        /// `stop` tripped first. Polls at `poll` granularity.
        pub fn accept_once(&mut self, stop: &Signal, poll: Duration) -> Result<bool> {
            if self.connected {
                return Err(Error::Channel(
                    "endpoint already served its client".to_string(),
                ));
            }

            loop {
                // SAFETY: handle is a live pipe server handle.
                match unsafe { ConnectNamedPipe(self.handle, None) } {
                    Ok(()) => break,
                    Err(e) if e.code() == ERROR_PIPE_CONNECTED.to_hresult() => {
                        // Client connected between our polls.
                        break;
                    }
                    Err(e) if e.code() == ERROR_PIPE_LISTENING.to_hresult() => {
                        if stop.wait_for(poll) {
                            return Ok(false);
                        }
                    }
                    Err(e) => return Err(Error::Channel(e.to_string())),
                }
            }

            self.connected = true;
            debug!("control channel client connected");
            Ok(true)
        }

        /// Wait for one packet and copy it into `buf`.
        ///
        /// Returns the byte count actually transferred; the rest of `buf`
        /// is stale and must not be interpreted. `Ok(None)` means `stop`
        /// tripped. Any connection failure is one undifferentiated channel
        /// error; the endpoint is in an unknown state afterwards.
        pub fn receive(
            &mut self,
            buf: &mut [u8; MAX_MESSAGE],
            stop: &Signal,
            poll: Duration,
        ) -> Result<Option<usize>> {
            if !self.connected {
                return Err(Error::Channel("no client connected".to_string()));
            }

            loop {
                let mut avail = 0u32;
                // SAFETY: handle is a live, connected pipe server handle.
                unsafe { PeekNamedPipe(self.handle, None, 0, None, Some(&mut avail), None) }
                    .map_err(|e| {
                        if e.code() == ERROR_BROKEN_PIPE.to_hresult() {
                            Error::Channel("client disconnected".to_string())
                        } else {
                            Error::Channel(e.to_string())
                        }
                    })?;

                if avail > 0 {
                    let mut read = 0u32;
                    // SAFETY: buf lives for the duration of the call; the
                    // peek above guarantees the read completes immediately.
                    unsafe { ReadFile(self.handle, Some(&mut buf[..]), Some(&mut read), None) }
                        .map_err(|e| Error::Channel(e.to_string()))?;
                    return Ok(Some(read as usize));
                }

                if stop.wait_for(poll) {
                    return Ok(None);
                }
            }
        }
    }

    impl Drop for ControlChannel {
        fn drop(&mut self) {
            if self.connected {
                // SAFETY: handle is a live, connected pipe server handle.
                let _ = unsafe { DisconnectNamedPipe(self.handle) };
            }
            // SAFETY: handle is owned by this struct and closed once.
            if let Err(e) = unsafe { CloseHandle(self.handle) } {
                warn!("failed to close control channel handle: {e}");
            }
        }
    }
}

#[cfg(target_os = "windows")]
pub use endpoint::ControlChannel;
