use std::collections::HashMap;

use crate::logical::{ActionId, ActionState, AxisId, AxisState, ButtonPhase};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum MouseButtonId {
    Left,
    Right,
    Middle,
    Back,
    Forward,
    Other(u16),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum DeviceKind {
    Keyboard(u16),
    MouseButton(MouseButtonId),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct PhysicalInputId {
    pub device: DeviceKind,
}

impl PhysicalInputId {
    pub fn key(code: u16) -> Self {
        Self {
            device: DeviceKind::Keyboard(code),
        }
    }

    pub fn mouse(button: MouseButtonId) -> Self {
        Self {
            device: DeviceKind::MouseButton(button),
        }
    }
}

/// Raw device state written by the window layer, plus the logical state
/// derived from it once per frame by [`InputState::apply_map`].
#[derive(Default, Debug)]
pub struct InputState {
    pub physical_buttons: HashMap<PhysicalInputId, bool>,

    pub actions: HashMap<ActionId, ActionState>,
    pub axes: HashMap<AxisId, AxisState>,

    pub mouse_delta: (f32, f32),
}

impl InputState {
    pub fn press(&mut self, input: PhysicalInputId) {
        self.physical_buttons.insert(input, true);
    }

    pub fn release(&mut self, input: PhysicalInputId) {
        self.physical_buttons.insert(input, false);
    }

    /// Mouse motion accumulates until [`InputState::end_frame`].
    pub fn add_mouse_delta(&mut self, dx: f32, dy: f32) {
        self.mouse_delta.0 += dx;
        self.mouse_delta.1 += dy;
    }

    pub fn is_held(&self, action: ActionId) -> bool {
        self.phase(action).contains(ButtonPhase::HELD)
    }

    /// True only on the frame the button went down.
    pub fn just_pressed(&self, action: ActionId) -> bool {
        self.phase(action).contains(ButtonPhase::PRESSED)
    }

    pub fn axis(&self, axis: AxisId) -> f32 {
        self.axes.get(&axis).map(|a| a.value).unwrap_or(0.0)
    }

    fn phase(&self, action: ActionId) -> ButtonPhase {
        self.actions
            .get(&action)
            .map(|a| a.phase.clone())
            .unwrap_or(ButtonPhase::NONE)
    }

    pub fn end_frame(&mut self) {
        self.mouse_delta = (0.0, 0.0);
    }
}
