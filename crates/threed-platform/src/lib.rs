// SPDX-License-Identifier: CEPL-1.0
//! Window-side glue: winit re-export plus the few decisions the app makes
//! about keys and window sizes.
pub use winit;

use winit::{
    dpi::PhysicalSize,
    event::{ElementState, KeyEvent},
    keyboard::{Key, ModifiersState, NamedKey},
    window::WindowAttributes,
};

pub const DEFAULT_TITLE: &str = "threed";
pub const DEFAULT_WIDTH: u32 = 1280;
pub const DEFAULT_HEIGHT: u32 = 768;

/// Zero dimensions are raised to 1.
pub fn window_attributes(title: &str, width: u32, height: u32) -> WindowAttributes {
    let (w, h) = (width.max(1), height.max(1));
    if (w, h) != (width, height) {
        tracing::warn!("window size {width}x{height} raised to {w}x{h}");
    }
    tracing::debug!("window '{title}' {w}x{h}");
    WindowAttributes::default()
        .with_title(title)
        .with_inner_size(PhysicalSize::new(w, h))
}

/// ESC, or Alt+F4 on platforms where the compositor leaves it to the app.
pub fn is_quit_key(event: &KeyEvent, modifiers: ModifiersState) -> bool {
    if event.state != ElementState::Pressed || event.repeat {
        return false;
    }
    quit_chord(&event.logical_key, modifiers)
}

fn quit_chord(key: &Key, modifiers: ModifiersState) -> bool {
    match key {
        Key::Named(NamedKey::Escape) => true,
        Key::Named(NamedKey::F4) => modifiers.alt_key(),
        _ => false,
    }
}

/// A zero-area window has nothing to present to.
pub fn is_minimized(size: PhysicalSize<u32>) -> bool {
    size.width == 0 || size.height == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_quits_without_modifiers() {
        assert!(quit_chord(
            &Key::Named(NamedKey::Escape),
            ModifiersState::empty()
        ));
    }

    #[test]
    fn f4_needs_alt() {
        let f4 = Key::Named(NamedKey::F4);
        assert!(!quit_chord(&f4, ModifiersState::empty()));
        assert!(!quit_chord(&f4, ModifiersState::CONTROL));
        assert!(quit_chord(&f4, ModifiersState::ALT));
    }

    #[test]
    fn other_keys_do_not_quit() {
        assert!(!quit_chord(&Key::Character("q".into()), ModifiersState::ALT));
    }

    #[test]
    fn window_attributes_never_ask_for_zero_area() {
        let attrs = window_attributes("t", 0, 600);
        assert_eq!(attrs.title, "t");
        assert_eq!(attrs.inner_size, Some(PhysicalSize::new(1u32, 600u32).into()));
        let attrs = window_attributes("t", 640, 480);
        assert_eq!(attrs.inner_size, Some(PhysicalSize::new(640u32, 480u32).into()));
    }

    #[test]
    fn minimized_means_zero_area() {
        assert!(is_minimized(PhysicalSize::new(0, 600)));
        assert!(is_minimized(PhysicalSize::new(800, 0)));
        assert!(!is_minimized(PhysicalSize::new(1, 1)));
    }
}
