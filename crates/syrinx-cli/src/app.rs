//! The Windows control loop: wait for the target, inject once, then keep
//! the control channel and keybind registry serviced until shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use syrinx_core::{
    AsyncKeyState, Config, ControlChannel, InjectError, InterruptFlag, KeybindRegistry,
    MAX_MESSAGE, PayloadDescriptor, Signal, ToolhelpScan, inject, inject_into_named_target,
    locate_target,
};
use tracing::{debug, error, info, warn};

const VK_END: u16 = 0x23;
const VK_F5: u16 = 0x74;

pub fn run(config: Config) -> Result<()> {
    let shutdown = Arc::new(Signal::new());
    let interrupt = Arc::new(InterruptFlag::new());

    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || shutdown.trigger())
            .context("failed to install the Ctrl-C handler")?;
    }
    let quit_monitor = crate::input::spawn_quit_monitor(Arc::clone(&shutdown));
    let channel = spawn_channel_thread(config.clone(), Arc::clone(&shutdown));

    let exit_code = drive(&config, &shutdown, &interrupt);

    shutdown.trigger();
    if channel.join().is_err() {
        warn!("control channel thread panicked");
    }
    if quit_monitor.join().is_err() {
        warn!("quit-key monitor thread panicked");
    }

    if exit_code != 0 {
        std::process::exit(i32::from(exit_code));
    }
    Ok(())
}

/// Wait for the target, inject, then run the tick loop. Returns the exit
/// code to report (0 on success or clean shutdown).
fn drive(config: &Config, shutdown: &Arc<Signal>, interrupt: &Arc<InterruptFlag>) -> u8 {
    let scan = ToolhelpScan;

    info!(process = %config.target_process, "waiting for target");
    let pid = loop {
        if shutdown.is_triggered() {
            return 0;
        }
        if interrupt.is_requested() {
            interrupt.reset();
            info!("interrupt requested, abandoning the wait");
            return 0;
        }
        match locate_target(&scan, &config.target_process, &config.target_module) {
            Ok(pid) => break pid,
            Err(e) => debug!(code = e.code(), "target not ready: {e}"),
        }
        if shutdown.wait_for(config.retry_interval()) {
            return 0;
        }
    };
    info!(pid, "target located");

    let code = match PayloadDescriptor::resolve(&config.payload_file) {
        Ok(payload) => match inject(pid, &payload, &config.inject_delays()) {
            Ok(()) => 0,
            Err(e) => {
                error!(code = e.code(), "injection failed: {e}");
                e.code()
            }
        },
        Err(e) => {
            error!("payload resolution failed: {e}");
            InjectError::PayloadResolution.code()
        }
    };
    info!(code, "injection finished");
    if code != 0 {
        return code;
    }

    control_loop(config, shutdown, interrupt);
    0
}

/// Poll the keybind registry once per tick until shutdown. END requests
/// shutdown; F5 requests another injection attempt from scratch.
fn control_loop(config: &Config, shutdown: &Arc<Signal>, interrupt: &Arc<InterruptFlag>) {
    let reinject = Arc::new(AtomicBool::new(false));
    let mut registry = KeybindRegistry::new(AsyncKeyState);

    {
        let shutdown = Arc::clone(shutdown);
        if let Err(e) = registry.register(VK_END, move || shutdown.trigger()) {
            warn!("failed to bind the shutdown key: {e}");
        }
    }
    {
        let reinject = Arc::clone(&reinject);
        if let Err(e) = registry.register(VK_F5, move || {
            reinject.store(true, Ordering::SeqCst);
        }) {
            warn!("failed to bind the re-inject key: {e}");
        }
    }

    while !shutdown.is_triggered() {
        registry.poll_once();

        if interrupt.is_requested() {
            interrupt.reset();
            info!("interrupt requested, shutting down");
            break;
        }
        if reinject.swap(false, Ordering::SeqCst) {
            info!("re-injection requested");
            match inject_into_named_target(&ToolhelpScan, config) {
                Ok(pid) => info!(pid, "re-injection requested the load"),
                Err(e) => warn!(code = e.code(), "re-injection failed: {e}"),
            }
        }

        shutdown.wait_for(config.tick_interval());
    }

    registry.clear();
}

/// Service the control channel on its own thread: accept the one client,
/// then log every packet until shutdown or disconnect. The channel has no
/// data dependency on injection and must not wait for it.
fn spawn_channel_thread(config: Config, shutdown: Arc<Signal>) -> JoinHandle<()> {
    thread::spawn(move || {
        let poll = config.poll_interval();
        let mut channel = match ControlChannel::create(&config.pipe_name) {
            Ok(c) => c,
            Err(e) => {
                warn!("control channel unavailable: {e}");
                return;
            }
        };
        info!(pipe = %config.pipe_name, "control channel listening");

        match channel.accept_once(&shutdown, poll) {
            Ok(true) => info!("payload connected to the control channel"),
            Ok(false) => return,
            Err(e) => {
                warn!("control channel accept failed: {e}");
                return;
            }
        }

        let mut buf = [0u8; MAX_MESSAGE];
        loop {
            match channel.receive(&mut buf, &shutdown, poll) {
                Ok(Some(n)) => info!(len = n, data = ?&buf[..n], "control packet received"),
                Ok(None) => break,
                Err(e) => {
                    warn!("control channel closed: {e}");
                    break;
                }
            }
        }
    })
}
