//! Backend abstraction layer
//!
//! Provides the common trait and types implemented by the wgpu backend and the
//! headless recording backend used in tests.

/// Newtype over `u32` bits with named flags, `contains` and `|`
macro_rules! bit_flags {
    ($(#[$doc:meta])* $name:ident { $($flag:ident = $value:expr,)* }) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name(u32);

        impl $name {
            $(pub const $flag: Self = Self($value);)*

            pub fn contains(&self, other: Self) -> bool {
                (self.0 & other.0) == other.0
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }
    };
}

pub mod dummy;
pub mod traits;
pub mod types;
pub mod wgpu_backend;

pub use traits::*;
pub use types::*;
