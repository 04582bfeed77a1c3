pub mod logical;
pub mod physical;

pub use logical::{ActionId, AxisId, ButtonPhase, InputMap};
pub use physical::{DeviceKind, InputState, MouseButtonId, PhysicalInputId};
