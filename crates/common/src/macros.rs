/// Parses a hex string literal into a [Felt](crate::Felt).
///
/// Panics on invalid input, so it is intended for constants and tests.
#[macro_export]
macro_rules! felt {
    ($hex:expr) => {
        $crate::Felt::from_hex_unchecked($hex)
    };
}

/// Generates felt newtype-wrappers.
///
/// Usage:
///     `felt_newtypes!(X1, X2, ..)`
macro_rules! felt_newtypes {
    ($($target:ident),* $(,)?) => {
        $(crate::macros::felt_newtypes!(@define $target);)*
    };

    (@define $target:ident) => {
        #[derive(Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $target(pub $crate::Felt);

        #[allow(unused)]
        impl $target {
            pub const ZERO: Self = Self($crate::Felt::ZERO);

            pub fn as_inner(&self) -> &$crate::Felt {
                &self.0
            }

            /// Parses a hex string, with or without the `0x` prefix.
            pub fn from_hex(hex: &str) -> Result<Self, $crate::ParseFeltError> {
                $crate::parse_hex(hex).map(Self)
            }
        }

        impl From<$crate::Felt> for $target {
            fn from(value: $crate::Felt) -> Self {
                Self(value)
            }
        }

        impl std::fmt::Debug for $target {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({:#x})", stringify!($target), self.0)
            }
        }

        impl std::fmt::Display for $target {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }
    };
}

pub(crate) use felt_newtypes;
