//! Domain types for the drawproxy dispatch engine.
//!
//! Pure data and rules only: workers (accounts), jobs and their status
//! machine, selection filters, and the persistence collaborator traits.
//! Nothing in here performs I/O.

/// Define a string-backed enum whose wire/database form is a fixed
/// SCREAMING_SNAKE_CASE literal per variant.
macro_rules! define_text_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $text)] $variant ),+
        }

        impl $name {
            /// All variants in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Return the wire/database literal.
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::error::CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err($crate::error::CoreError::Validation(format!(
                        "Unknown {} value: \"{other}\"",
                        stringify!($name)
                    ))),
                }
            }
        }
    };
}

pub mod error;
pub mod filter;
pub mod job;
pub mod store;
pub mod types;
pub mod worker;
