//! Data models for routinekit.
//!
//! This module re-exports all model types used throughout the library.

pub mod command;
pub mod parameter;
pub mod value;

// Re-export commonly used types
pub use command::{
    Command, CommandKind, ExecutionOutcome, Fetch, PostExecutionContext, PreExecutionContext,
    RoutineKind, Row,
};
pub use parameter::{Direction, ParamValue, ParameterDescriptor, ParameterSet, TypedArray, WireType};
pub use value::{DbEnum, Document, EnumStorage, EnumValue, Fields, ToFields, Value, list};

/// Implement [`DbEnum`] for a fieldless `Copy` enum.
///
/// ```ignore
/// #[derive(Clone, Copy)]
/// #[repr(u8)]
/// enum Status { Inactive = 0, Active = 1 }
///
/// routinekit::db_enum!(Status, Bits8 { Inactive, Active });
/// ```
#[macro_export]
macro_rules! db_enum {
    ($ty:ty, $storage:ident { $($variant:ident),+ $(,)? }) => {
        impl $crate::models::DbEnum for $ty {
            const STORAGE: $crate::models::EnumStorage = $crate::models::EnumStorage::$storage;

            fn variant_name(&self) -> Option<&'static str> {
                match self {
                    $(Self::$variant => Some(stringify!($variant)),)+
                }
            }

            fn ordinal(&self) -> i64 {
                *self as i64
            }
        }
    };
}
