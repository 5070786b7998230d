//! Identifiers for village agents and the players they talk to.
//!
//! Both are UUID newtypes so an agent id can never be passed where a player
//! id is expected. They order by UUID, which the orchestrator relies on for a
//! stable rotation order.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Fresh random id
            #[inline]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Deterministic id, for fixtures and replays
            #[inline]
            pub const fn from_u128(value: u128) -> Self {
                Self(Uuid::from_u128(value))
            }

            /// The all-zero id
            #[inline]
            pub const fn nil() -> Self {
                Self(Uuid::nil())
            }

            /// Whether this is the all-zero id
            #[inline]
            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }

            /// Underlying UUID
            #[inline]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        // Log lines only need the first block.
        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let text = self.0.simple().to_string();
                write!(f, "{}({})", stringify!($name), &text[..8])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_newtype!(
    /// Stable identifier of a simulated village inhabitant
    AgentId
);

uuid_newtype!(
    /// Identifier of a player an agent converses with
    PlayerId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_ids_are_unique() {
        assert_ne!(AgentId::new(), AgentId::new());
    }

    #[test]
    fn test_parse_and_display() {
        let text = "550e8400-e29b-41d4-a716-446655440000";
        let id: PlayerId = text.parse().unwrap();
        assert_eq!(id.to_string(), text);
        assert!("not-a-uuid".parse::<AgentId>().is_err());
    }

    #[test]
    fn test_ordering_follows_uuid() {
        assert!(AgentId::from_u128(1) < AgentId::from_u128(2));
        assert!(AgentId::nil().is_nil());
        assert_eq!(AgentId::from(Uuid::from_u128(9)), AgentId::from_u128(9));
    }

    #[test]
    fn test_debug_is_short() {
        assert_eq!(format!("{:?}", AgentId::from_u128(0xabcd_ef01 << 96)), "AgentId(abcdef01)");
    }
}
