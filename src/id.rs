//! Newtypes around Discord IDs.

use serde::{
    de::{Error as DeError, Visitor},
    Deserialize,
    Deserializer,
    Serialize,
    Serializer,
};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    num::NonZeroU64,
};

macro_rules! impl_id {
    ($Id:ident) => {
        impl $Id {
            /// Returns the u64 representation of this Id.
            #[must_use]
            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl Display for $Id {
            fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
                Display::fmt(&self.0, f)
            }
        }

        impl From<u64> for $Id {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }

        impl From<NonZeroU64> for $Id {
            fn from(id: NonZeroU64) -> Self {
                Self(id.get())
            }
        }

        impl From<$Id> for u64 {
            fn from(id: $Id) -> Self {
                id.0
            }
        }

        // Snowflakes travel as strings on the wire, though some servers send integers.
        impl Serialize for $Id {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $Id {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                deserializer.deserialize_any(SnowflakeVisitor).map(Self)
            }
        }
    };
}

struct SnowflakeVisitor;

impl Visitor<'_> for SnowflakeVisitor {
    type Value = u64;

    fn expecting(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str("a snowflake as a string or integer")
    }

    fn visit_u64<E: DeError>(self, v: u64) -> Result<u64, E> {
        Ok(v)
    }

    fn visit_i64<E: DeError>(self, v: i64) -> Result<u64, E> {
        u64::try_from(v).map_err(|_| E::custom("negative snowflake"))
    }

    fn visit_str<E: DeError>(self, v: &str) -> Result<u64, E> {
        v.parse().map_err(E::custom)
    }
}

/// ID of a Discord voice/text channel.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ChannelId(u64);

/// ID of a Discord guild (colloquially, "server").
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct GuildId(u64);

/// ID of a Discord user.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct UserId(u64);

impl_id! {ChannelId}
impl_id! {GuildId}
impl_id! {UserId}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_serialize_as_strings() {
        let id = GuildId::from(41771983423143937);
        assert_eq!(
            serde_json::to_string(&id).unwrap(),
            "\"41771983423143937\""
        );
    }

    #[test]
    fn ids_accept_strings_and_integers() {
        let a: UserId = serde_json::from_str("\"1234\"").unwrap();
        let b: UserId = serde_json::from_str("1234").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.get(), 1234);
    }
}
