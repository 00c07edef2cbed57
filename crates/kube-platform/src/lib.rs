// SPDX-License-Identifier: CEPL-1.0
pub use winit;

use winit::dpi::PhysicalSize;
use winit::event::ElementState;
use winit::keyboard::{Key, NamedKey};

pub const DEFAULT_WIDTH: u32 = 800;
pub const DEFAULT_HEIGHT: u32 = 600;
pub const DEFAULT_TITLE: &str = "Kube Vulkan";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyAction {
    Exit,
    TogglePause,
}

/// Escape closes, space toggles pause. Only fresh presses count.
pub fn map_key(key: &Key, state: ElementState, repeat: bool) -> Option<KeyAction> {
    if state != ElementState::Pressed || repeat {
        return None;
    }
    match key {
        Key::Named(NamedKey::Escape) => Some(KeyAction::Exit),
        Key::Named(NamedKey::Space) => Some(KeyAction::TogglePause),
        _ => None,
    }
}

pub fn is_drawable(size: PhysicalSize<u32>) -> bool {
    size.width > 0 && size.height > 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_and_space() {
        let esc = Key::Named(NamedKey::Escape);
        let space = Key::Named(NamedKey::Space);
        assert_eq!(map_key(&esc, ElementState::Pressed, false), Some(KeyAction::Exit));
        assert_eq!(
            map_key(&space, ElementState::Pressed, false),
            Some(KeyAction::TogglePause)
        );
    }

    #[test]
    fn releases_repeats_and_other_keys_ignored() {
        let space = Key::Named(NamedKey::Space);
        assert_eq!(map_key(&space, ElementState::Released, false), None);
        assert_eq!(map_key(&space, ElementState::Pressed, true), None);
        let a: Key = Key::Character("a".into());
        assert_eq!(map_key(&a, ElementState::Pressed, false), None);
    }

    #[test]
    fn zero_sized_framebuffer_not_drawable() {
        assert!(!is_drawable(PhysicalSize::new(0, 0)));
        assert!(!is_drawable(PhysicalSize::new(800, 0)));
        assert!(is_drawable(PhysicalSize::new(800, 600)));
    }
}
