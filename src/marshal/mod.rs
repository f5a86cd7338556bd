//! Marshalling: enum encoding, parameter building and routine statement resolution.

pub mod enums;
pub mod parameters;
pub mod routine;

pub use enums::EnumResolver;
pub use parameters::{ParameterBuilder, to_plain_mapping};
pub use routine::RoutineResolver;
