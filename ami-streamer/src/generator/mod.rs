pub mod fleet;
pub mod synth;

pub use fleet::{FleetResolver, MeterSource};
pub use synth::synthesize;
