//! Newtype wrappers for string identifiers, providing compile-time type safety.
//!
//! All newtypes serialize/deserialize as plain strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance from a string.
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Return the inner string as a slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_newtype!(
    /// Persistent identity of a configuration object. Factory instances use
    /// the `factoryPid~name` form.
    Pid
);

string_newtype!(
    /// Identity a container assigns to a module from its own metadata,
    /// independent of the coordinate it was installed from.
    SymbolicName
);

/// Separator between the factory pid and the instance name of a factory
/// configuration.
pub const FACTORY_SEPARATOR: char = '~';

impl Pid {
    /// Build the effective pid of a factory configuration instance.
    pub fn factory(factory_pid: &str, name: &str) -> Self {
        Self(format!("{factory_pid}{FACTORY_SEPARATOR}{name}"))
    }

    /// Split a `factoryPid~name` pid into its parts. Plain pids return `None`.
    pub fn split_factory(&self) -> Option<(&str, &str)> {
        self.0.split_once(FACTORY_SEPARATOR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_display_and_as_ref() {
        let pid = Pid::new("org.example.service");
        assert_eq!(pid.to_string(), "org.example.service");
        assert_eq!(pid.as_str(), "org.example.service");
        assert_eq!(AsRef::<str>::as_ref(&pid), "org.example.service");
    }

    #[test]
    fn pid_serde_is_transparent() {
        let pid = Pid::new("fp~inst");
        let json = serde_json::to_string(&pid).unwrap();
        assert_eq!(json, "\"fp~inst\"");
        let back: Pid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pid);
    }

    #[test]
    fn factory_pid_roundtrip() {
        let pid = Pid::factory("fp", "inst");
        assert_eq!(pid, "fp~inst");
        assert_eq!(pid.split_factory(), Some(("fp", "inst")));
        assert_eq!(Pid::new("plain").split_factory(), None);
    }

    #[test]
    fn symbolic_name_equality() {
        let a = SymbolicName::from("org.example.a");
        let b = SymbolicName::new("org.example.a".to_owned());
        assert_eq!(a, b);
        assert_ne!(a, SymbolicName::from("org.example.b"));
    }
}
