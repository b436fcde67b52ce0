//! Terminal quit keys.
//!
//! A small monitor thread that turns Esc, q/Q, or Ctrl+C typed into the
//! console into the shared shutdown signal. This is separate from the
//! keybind registry: the registry reads global key state for the control
//! surface, this reads the loader's own terminal.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use syrinx_core::Signal;
use tracing::debug;

pub fn spawn_quit_monitor(shutdown: Arc<Signal>) -> JoinHandle<()> {
    thread::spawn(move || {
        debug!("quit-key monitor started");

        while !shutdown.is_triggered() {
            // Poll with a timeout so the shutdown check stays live even
            // when no keys arrive.
            if !event::poll(Duration::from_millis(100)).unwrap_or(false) {
                continue;
            }
            if let Ok(Event::Key(key)) = event::read() {
                if is_quit_key(&key) {
                    debug!(code = ?key.code, "quit key pressed");
                    shutdown.trigger();
                    break;
                }
            }
        }

        debug!("quit-key monitor stopped");
    })
}

fn is_quit_key(event: &KeyEvent) -> bool {
    match event.code {
        KeyCode::Esc => true,
        KeyCode::Char('q') | KeyCode::Char('Q') => true,
        KeyCode::Char('c') if event.modifiers.contains(KeyModifiers::CONTROL) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn esc_and_q_quit() {
        assert!(is_quit_key(&KeyEvent::new(KeyCode::Esc, KeyModifiers::NONE)));
        assert!(is_quit_key(&KeyEvent::new(
            KeyCode::Char('q'),
            KeyModifiers::NONE
        )));
        assert!(is_quit_key(&KeyEvent::new(
            KeyCode::Char('Q'),
            KeyModifiers::SHIFT
        )));
    }

    #[test]
    fn ctrl_c_quits_but_plain_c_does_not() {
        assert!(is_quit_key(&KeyEvent::new(
            KeyCode::Char('c'),
            KeyModifiers::CONTROL
        )));
        assert!(!is_quit_key(&KeyEvent::new(
            KeyCode::Char('c'),
            KeyModifiers::NONE
        )));
    }

    #[test]
    fn other_keys_are_ignored() {
        assert!(!is_quit_key(&KeyEvent::new(
            KeyCode::Enter,
            KeyModifiers::NONE
        )));
        assert!(!is_quit_key(&KeyEvent::new(
            KeyCode::Char('x'),
            KeyModifiers::NONE
        )));
    }
}
