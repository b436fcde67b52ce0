//! Polled keybind registry.
//!
//! The control loop polls the registry once per tick; a callback fires on
//! the not-pressed to pressed transition of its key and never again while
//! the key stays held. Edge detection tracks each entry's previous state
//! rather than the hardware "just pressed" bit, which is cleared
//! system-wide on read and therefore unreliable.

use crate::error::{Error, Result};

/// Most entries the registry will hold at once.
pub const MAX_BINDINGS: usize = 64;

/// Where the registry reads key state from. Production uses
/// [`AsyncKeyState`]; tests script their own.
pub trait KeyState {
    /// Whether the key is down right now.
    fn is_pressed(&self, vk: u16) -> bool;
}

/// Handle to one registered binding, used to unregister it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingId(u64);

struct Entry {
    id: u64,
    vk: u16,
    was_pressed: bool,
    on_pressed: Box<dyn FnMut()>,
}

/// Fixed-capacity map from virtual-key code to callback. No two entries
/// may share a key code.
pub struct KeybindRegistry<S> {
    source: S,
    entries: Vec<Entry>,
    next_id: u64,
}

impl<S: KeyState> KeybindRegistry<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            entries: Vec::new(),
            next_id: 0,
        }
    }

    /// Bind `on_pressed` to `vk`. Fails with [`Error::DuplicateKey`] when
    /// the key is taken and [`Error::RegistryFull`] at capacity.
    pub fn register<F>(&mut self, vk: u16, on_pressed: F) -> Result<BindingId>
    where
        F: FnMut() + 'static,
    {
        if self.entries.iter().any(|e| e.vk == vk) {
            return Err(Error::DuplicateKey(vk));
        }
        if self.entries.len() >= MAX_BINDINGS {
            return Err(Error::RegistryFull);
        }

        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(Entry {
            id,
            vk,
            was_pressed: false,
            on_pressed: Box::new(on_pressed),
        });
        Ok(BindingId(id))
    }

    /// Remove one binding. Fails with [`Error::BindingNotFound`] when the
    /// handle does not name a live entry.
    pub fn unregister(&mut self, binding: BindingId) -> Result<()> {
        let index = self
            .entries
            .iter()
            .position(|e| e.id == binding.0)
            .ok_or(Error::BindingNotFound)?;
        self.entries.remove(index);
        Ok(())
    }

    /// Read every bound key once and fire the callbacks whose key went
    /// down since the previous poll.
    pub fn poll_once(&mut self) {
        for entry in &mut self.entries {
            let pressed = self.source.is_pressed(entry.vk);
            if pressed && !entry.was_pressed {
                (entry.on_pressed)();
            }
            entry.was_pressed = pressed;
        }
    }

    /// Drop every binding.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(target_os = "windows")]
mod async_key_state {
    use windows::Win32::UI::Input::KeyboardAndMouse::GetAsyncKeyState;

    use super::KeyState;

    /// Hardware key state via `GetAsyncKeyState`'s "currently down" bit.
    pub struct AsyncKeyState;

    impl KeyState for AsyncKeyState {
        fn is_pressed(&self, vk: u16) -> bool {
            // SAFETY: no preconditions for any key code value.
            let state = unsafe { GetAsyncKeyState(i32::from(vk)) };
            (state as u16) & 0x8000 != 0
        }
    }
}

#[cfg(target_os = "windows")]
pub use async_key_state::AsyncKeyState;

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::collections::HashSet;
    use std::rc::Rc;

    use super::*;

    #[derive(Clone, Default)]
    struct ScriptedKeys {
        down: Rc<RefCell<HashSet<u16>>>,
    }

    impl ScriptedKeys {
        fn press(&self, vk: u16) {
            self.down.borrow_mut().insert(vk);
        }

        fn release(&self, vk: u16) {
            self.down.borrow_mut().remove(&vk);
        }
    }

    impl KeyState for ScriptedKeys {
        fn is_pressed(&self, vk: u16) -> bool {
            self.down.borrow().contains(&vk)
        }
    }

    fn counting_registry(keys: &ScriptedKeys, vk: u16) -> (KeybindRegistry<ScriptedKeys>, Rc<Cell<u32>>) {
        let mut registry = KeybindRegistry::new(keys.clone());
        let fired = Rc::new(Cell::new(0));
        let counter = Rc::clone(&fired);
        registry
            .register(vk, move || counter.set(counter.get() + 1))
            .unwrap();
        (registry, fired)
    }

    #[test]
    fn rebinding_a_key_fails_with_duplicate() {
        let mut registry = KeybindRegistry::new(ScriptedKeys::default());
        registry.register(0x23, || {}).unwrap();

        let result = registry.register(0x23, || {});
        assert!(matches!(result, Err(Error::DuplicateKey(0x23))));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn capacity_is_enforced() {
        let mut registry = KeybindRegistry::new(ScriptedKeys::default());
        for vk in 0..MAX_BINDINGS as u16 {
            registry.register(vk, || {}).unwrap();
        }

        let result = registry.register(0x1000, || {});
        assert!(matches!(result, Err(Error::RegistryFull)));
    }

    #[test]
    fn unregister_frees_the_key_for_rebinding() {
        let mut registry = KeybindRegistry::new(ScriptedKeys::default());
        let binding = registry.register(0x23, || {}).unwrap();

        registry.unregister(binding).unwrap();
        assert!(registry.is_empty());
        registry.register(0x23, || {}).unwrap();
    }

    #[test]
    fn unregister_twice_fails_with_not_found() {
        let mut registry = KeybindRegistry::new(ScriptedKeys::default());
        let binding = registry.register(0x23, || {}).unwrap();

        registry.unregister(binding).unwrap();
        assert!(matches!(
            registry.unregister(binding),
            Err(Error::BindingNotFound)
        ));
    }

    #[test]
    fn a_held_key_fires_exactly_once() {
        let keys = ScriptedKeys::default();
        let (mut registry, fired) = counting_registry(&keys, 0x23);

        keys.press(0x23);
        for _ in 0..10 {
            registry.poll_once();
        }
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn releasing_and_pressing_again_fires_again() {
        let keys = ScriptedKeys::default();
        let (mut registry, fired) = counting_registry(&keys, 0x23);

        keys.press(0x23);
        registry.poll_once();
        keys.release(0x23);
        registry.poll_once();
        keys.press(0x23);
        registry.poll_once();

        assert_eq!(fired.get(), 2);
    }

    #[test]
    fn an_unpressed_key_never_fires() {
        let keys = ScriptedKeys::default();
        let (mut registry, fired) = counting_registry(&keys, 0x23);

        for _ in 0..10 {
            registry.poll_once();
        }
        assert_eq!(fired.get(), 0);
    }

    #[test]
    fn each_entry_tracks_its_own_edge() {
        let keys = ScriptedKeys::default();
        let mut registry = KeybindRegistry::new(keys.clone());
        let fired: Rc<RefCell<Vec<u16>>> = Rc::default();

        for vk in [0x23u16, 0x74] {
            let log = Rc::clone(&fired);
            registry.register(vk, move || log.borrow_mut().push(vk)).unwrap();
        }

        keys.press(0x23);
        registry.poll_once();
        keys.press(0x74);
        registry.poll_once();
        registry.poll_once();

        assert_eq!(*fired.borrow(), vec![0x23, 0x74]);
    }

    #[test]
    fn clear_empties_the_registry() {
        let keys = ScriptedKeys::default();
        let (mut registry, fired) = counting_registry(&keys, 0x23);

        registry.clear();
        assert!(registry.is_empty());

        keys.press(0x23);
        registry.poll_once();
        assert_eq!(fired.get(), 0);
    }
}
