pub mod hysteresis;
pub mod probe;

pub use hysteresis::HysteresisGate;
pub use probe::ThermalProbe;
