//! # syrinx-core
//!
//! Core library for the syrinx loader.
//!
//! This crate provides:
//! - Process and module discovery over toolhelp snapshots
//! - Remote DLL injection with a stable per-step error-code taxonomy
//! - The inbound named-pipe control channel
//! - A polled, edge-triggered keybind registry
//! - Shared shutdown/interrupt signalling and runtime configuration
//!
//! Everything touching Win32 is gated on `target_os = "windows"`; the pure
//! logic (matching rules, registry, configuration, signalling) builds and
//! tests anywhere.

pub mod config;
pub mod error;
pub mod inject;
pub mod keybind;
pub mod payload;
pub mod pipe;
pub mod process;
pub mod signal;

pub use config::Config;
pub use error::{Error, Result};
pub use inject::{InjectDelays, InjectError, locate_target};
pub use keybind::{BindingId, KeyState, KeybindRegistry, MAX_BINDINGS};
pub use payload::PayloadDescriptor;
pub use pipe::MAX_MESSAGE;
pub use process::ProcessScan;
pub use signal::{InterruptFlag, Signal};

#[cfg(target_os = "windows")]
pub use inject::{inject, inject_into_named_target};
#[cfg(target_os = "windows")]
pub use keybind::AsyncKeyState;
#[cfg(target_os = "windows")]
pub use pipe::ControlChannel;
#[cfg(target_os = "windows")]
pub use process::{ToolhelpScan, find_module_base, find_process_by_name};
