use crate::physical::{InputState, PhysicalInputId};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ActionId(pub u32);
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct AxisId(pub u32);

#[derive(Clone, Debug)]
pub enum BindingKind {
    Button { action: ActionId },
    Axis { axis: AxisId, scale: f32 },
}

#[derive(Clone, Debug)]
pub struct InputBinding {
    pub physical: PhysicalInputId,
    pub kind: BindingKind,
}

bitflags::bitflags! {
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct ButtonPhase: u8 {
        const NONE     = 0;
        const PRESSED  = 1 << 0;
        const HELD     = 1 << 1;
        const RELEASED = 1 << 2;
    }
}

#[derive(Clone, Debug)]
pub struct ActionState {
    pub phase: ButtonPhase,
}

#[derive(Clone, Debug)]
pub struct AxisState {
    pub value: f32,
}

#[derive(Default, Clone, Debug)]
pub struct InputMap {
    pub bindings: Vec<InputBinding>,
}

impl InputMap {
    pub fn bind_keyboard_button(&mut self, key_code: u16, action: ActionId) -> &mut Self {
        self.bindings.push(InputBinding {
            physical: PhysicalInputId::key(key_code),
            kind: BindingKind::Button { action },
        });

        self
    }

    pub fn bind_keyboard_axis(&mut self, key_code: u16, axis: AxisId, scale: f32) -> &mut Self {
        self.bindings.push(InputBinding {
            physical: PhysicalInputId::key(key_code),
            kind: BindingKind::Axis { axis, scale },
        });

        self
    }
}

impl InputState {
    /// Derives action phases and axis values from the physical state.
    /// Run once per frame before gameplay reads the actions.
    pub fn apply_map(&mut self, input_map: &InputMap) {
        // Reset logical state
        for action in self.actions.values_mut() {
            let was_held = action.phase.contains(ButtonPhase::HELD);
            action.phase = if was_held {
                ButtonPhase::HELD
            } else {
                ButtonPhase::NONE
            };
        }
        for axis in self.axes.values_mut() {
            axis.value = 0.0;
        }

        for binding in &input_map.bindings {
            match binding.kind {
                BindingKind::Button { action } => {
                    let pressed = self
                        .physical_buttons
                        .get(&binding.physical)
                        .copied()
                        .unwrap_or(false);
                    let entry = self.actions.entry(action).or_insert(ActionState {
                        phase: ButtonPhase::NONE,
                    });
                    if pressed {
                        if !entry.phase.contains(ButtonPhase::HELD) {
                            entry.phase |= ButtonPhase::PRESSED | ButtonPhase::HELD;
                        }
                    } else if entry.phase.contains(ButtonPhase::HELD) {
                        entry.phase &= !ButtonPhase::HELD;
                        entry.phase |= ButtonPhase::RELEASED;
                    }
                }
                BindingKind::Axis { axis, scale } => {
                    let value = match self.physical_buttons.get(&binding.physical) {
                        Some(true) => 1.0,
                        _ => 0.0,
                    };
                    let entry = self.axes.entry(axis).or_insert(AxisState { value: 0.0 });
                    entry.value += value * scale;
                }
            }
        }
    }
}
