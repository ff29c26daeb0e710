use std::fmt;
use std::str::FromStr;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 255;

/// Settings consumed by the verification store and query engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Longest accepted message, in characters.
    pub max_message_length: usize,
    pub groups: GroupMap,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
            groups: GroupMap::default(),
        }
    }
}

/// Ordered group name -> group id table.
///
/// Names missing from the table make every group operation a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMap {
    entries: Vec<(String, i64)>,
}

impl GroupMap {
    pub fn empty() -> Self {
        Self { entries: Vec::new() }
    }

    /// Insert or overwrite `name`, keeping its original position.
    pub fn insert(&mut self, name: impl Into<String>, id: i64) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = id,
            None => self.entries.push((name, id)),
        }
    }

    pub fn resolve(&self, name: &str) -> Option<i64> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, id)| *id)
    }

    /// First name mapped to `id`.
    pub fn name_of(&self, id: i64) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, gid)| *gid == id)
            .map(|(n, _)| n.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.entries.iter().map(|(n, id)| (n.as_str(), *id))
    }
}

impl Default for GroupMap {
    fn default() -> Self {
        let mut groups = Self::empty();
        for (id, name) in ["text", "phone", "cam", "personally", "intimately"]
            .into_iter()
            .enumerate()
        {
            groups.insert(name, id as i64);
        }
        groups
    }
}

impl<S: Into<String>> FromIterator<(S, i64)> for GroupMap {
    fn from_iter<I: IntoIterator<Item = (S, i64)>>(iter: I) -> Self {
        let mut groups = Self::empty();
        for (name, id) in iter {
            groups.insert(name, id);
        }
        groups
    }
}

/// Parses `name=id,name=id`. Whitespace around tokens is ignored.
impl FromStr for GroupMap {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut groups = Self::empty();
        for pair in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (name, id) = pair
                .split_once('=')
                .ok_or_else(|| format!("group entry `{pair}` is not name=id"))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(format!("group entry `{pair}` has an empty name"));
            }
            let id = id
                .trim()
                .parse::<i64>()
                .map_err(|e| format!("group `{name}` has a bad id: {e}"))?;
            groups.insert(name, id);
        }
        Ok(groups)
    }
}

impl Serialize for GroupMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, id) in &self.entries {
            map.serialize_entry(name, id)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for GroupMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct GroupMapVisitor;

        impl<'de> Visitor<'de> for GroupMapVisitor {
            type Value = GroupMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of group names to integer ids")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<GroupMap, A::Error> {
                let mut groups = GroupMap::empty();
                while let Some((name, id)) = access.next_entry::<String, i64>()? {
                    groups.insert(name, id);
                }
                Ok(groups)
            }
        }

        deserializer.deserialize_map(GroupMapVisitor)
    }
}
