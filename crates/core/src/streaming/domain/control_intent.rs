use std::fmt;

/// Which server-side detection backend the stream should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Coordinator {
    #[default]
    OpenCv,
    Main,
}

impl Coordinator {
    pub fn toggled(self) -> Self {
        match self {
            Coordinator::OpenCv => Coordinator::Main,
            Coordinator::Main => Coordinator::OpenCv,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Coordinator::OpenCv => "OpenCV",
            Coordinator::Main => "Main",
        }
    }
}

impl fmt::Display for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What the operator last asked the streaming service to do.
///
/// Toggles are fire-and-forget and the server never confirms them, so this
/// is the client's belief, not the server's state. It can drift if a
/// signal is lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlIntent {
    pub debug_overlay: bool,
    pub coordinator: Coordinator,
}

impl ControlIntent {
    pub fn toggle_debug(&mut self) -> bool {
        self.debug_overlay = !self.debug_overlay;
        self.debug_overlay
    }

    pub fn toggle_coordinator(&mut self) -> Coordinator {
        self.coordinator = self.coordinator.toggled();
        self.coordinator
    }
}

impl Default for ControlIntent {
    fn default() -> Self {
        Self {
            debug_overlay: true,
            coordinator: Coordinator::default(),
        }
    }
}

impl fmt::Display for ControlIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "debug overlay {}, coordinator {}",
            if self.debug_overlay { "ON" } else { "OFF" },
            self.coordinator
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_fresh_client() {
        let intent = ControlIntent::default();
        assert!(intent.debug_overlay);
        assert_eq!(intent.coordinator, Coordinator::OpenCv);
    }

    #[test]
    fn test_toggles_flip_and_return_new_value() {
        let mut intent = ControlIntent::default();
        assert!(!intent.toggle_debug());
        assert!(intent.toggle_debug());
        assert_eq!(intent.toggle_coordinator(), Coordinator::Main);
        assert_eq!(intent.toggle_coordinator(), Coordinator::OpenCv);
    }

    #[test]
    fn test_display() {
        let mut intent = ControlIntent::default();
        intent.toggle_debug();
        intent.toggle_coordinator();
        assert_eq!(intent.to_string(), "debug overlay OFF, coordinator Main");
    }
}
