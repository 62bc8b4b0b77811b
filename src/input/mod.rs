//! Input module - discrete input transports and simulation

mod manager;
mod simulator;
mod traits;
pub mod rtu;

#[cfg(feature = "serial")]
mod modbus;

pub use manager::InputManager;
pub use simulator::{InputSimulator, SimulatorConfig};
pub use traits::{
    InputHealth, InputMode, InputSource, InputStatus, RawInputFrame, TransportError,
    FRAME_WIDTH, JOINT_SENSOR_BIT, MACHINE_POWER_BIT,
};

#[cfg(feature = "serial")]
pub use modbus::ModbusInput;
