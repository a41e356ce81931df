//! Type-safe identifier wrappers.
//!
//! Plants are named in configuration (`filter-1`, `electrolyzer-3`) and
//! those names travel on the wire as requester and supplier ids. Wrapping
//! them keeps a plant id from being confused with a topic or a timestamp.
//!
//! Ordering is lexicographic on the inner string. The tiered allocation
//! policy relies on it for its deterministic evaluation order.

use serde::{Deserialize, Serialize};

/// Generates a newtype wrapper around [`String`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create an identifier from anything string-like.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Return the inner [`String`] value.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

define_id! {
    /// Identifier of a plant, source, or consumer taking part in a negotiation.
    PlantId
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn ids_order_lexicographically() {
        let mut ids = vec![
            PlantId::from("filter-b"),
            PlantId::from("filter-a"),
            PlantId::from("distil-1"),
        ];
        ids.sort();
        let names: Vec<&str> = ids.iter().map(PlantId::as_str).collect();
        assert_eq!(names, vec!["distil-1", "filter-a", "filter-b"]);
    }

    #[test]
    fn id_serializes_as_bare_string() {
        let id = PlantId::new("electrolyzer-1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"electrolyzer-1\"");
        let back: PlantId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
