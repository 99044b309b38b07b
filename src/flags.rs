//! Semantic tags attached to survey stations and shots.

use itertools::Itertools;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Flags are identified by their code: `Other("srf")` is the same flag as
/// `Surface`. Build unknown flags with [`Flag::other`].
#[derive(Debug, Clone)]
pub enum Flag {
    /// Cave entrance
    Entrance,
    /// Surface shot, outside of the cave
    Surface,
    /// Survey shot measured twice
    Duplicate,
    /// Artificial passage (tunnel, mine gallery)
    Artificial,
    /// Explicitly marked for removal
    Remove,
    /// Splay shot (star shots in large rooms)
    Splay,
    /// Edge added after the survey import
    Add,
    Other(String),
}

/// Flags whose edges are dropped by [`crate::cleaning::remove_flagged_edges`]
/// unless told otherwise.
pub const DEFAULT_REMOVED_FLAGS: [Flag; 5] = [
    Flag::Surface,
    Flag::Duplicate,
    Flag::Remove,
    Flag::Artificial,
    Flag::Splay,
];

impl Flag {
    pub fn code(&self) -> &str {
        match self {
            Flag::Entrance => "ent",
            Flag::Surface => "srf",
            Flag::Duplicate => "dpl",
            Flag::Artificial => "art",
            Flag::Remove => "rmv",
            Flag::Splay => "spl",
            Flag::Add => "add",
            Flag::Other(code) => code.as_str(),
        }
    }

    /// Known code to its variant, anything else to `Other`.
    pub fn other(code: &str) -> Flag {
        match code.parse() {
            Ok(flag) => flag,
            Err(never) => match never {},
        }
    }

    pub fn default_removed() -> Vec<Flag> {
        DEFAULT_REMOVED_FLAGS.to_vec()
    }
}

impl FromStr for Flag {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "ent" => Flag::Entrance,
            "srf" => Flag::Surface,
            "dpl" => Flag::Duplicate,
            "art" => Flag::Artificial,
            "rmv" => Flag::Remove,
            "spl" => Flag::Splay,
            "add" => Flag::Add,
            other => Flag::Other(other.to_string()),
        })
    }
}

impl PartialEq for Flag {
    fn eq(&self, other: &Self) -> bool {
        self.code() == other.code()
    }
}

impl Eq for Flag {}

impl Hash for Flag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.code().hash(state);
    }
}

impl Ord for Flag {
    fn cmp(&self, other: &Self) -> Ordering {
        self.code().cmp(other.code())
    }
}

impl PartialOrd for Flag {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl Serialize for Flag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

impl<'de> Deserialize<'de> for Flag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        Ok(Flag::other(&code))
    }
}

/// Joins flags with `;`, the separator used in CSV and DBF columns.
pub fn join_flags(flags: &[Flag]) -> String {
    flags.iter().map(Flag::code).join(";")
}

pub fn split_flags(s: &str) -> Vec<Flag> {
    s.split(';')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(Flag::other)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_parse_back() {
        for flag in DEFAULT_REMOVED_FLAGS.iter().chain([Flag::Entrance, Flag::Add].iter()) {
            assert_eq!(&flag.code().parse::<Flag>().unwrap(), flag);
        }
        assert_eq!(
            "sump".parse::<Flag>().unwrap(),
            Flag::Other("sump".to_string())
        );
    }

    #[test]
    fn test_other_with_known_code_is_that_flag() {
        assert!(matches!(Flag::other("srf"), Flag::Surface));
        assert_eq!(Flag::Other("srf".to_string()), Flag::Surface);
        assert!(DEFAULT_REMOVED_FLAGS.contains(&Flag::Other("dpl".to_string())));

        let mut set = std::collections::BTreeSet::new();
        set.insert(Flag::Splay);
        assert!(!set.insert(Flag::Other("spl".to_string())));
    }

    #[test]
    fn test_split_flags_skips_blanks() {
        let flags = split_flags("dpl; ;srf;");
        assert_eq!(flags, vec![Flag::Duplicate, Flag::Surface]);
        assert_eq!(join_flags(&flags), "dpl;srf");
        assert!(split_flags("").is_empty());
    }

    #[test]
    fn test_serde_uses_codes() {
        let json = serde_json::to_string(&vec![Flag::Entrance, Flag::other("x")]).unwrap();
        assert_eq!(json, r#"["ent","x"]"#);
        let back: Vec<Flag> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, vec![Flag::Entrance, Flag::other("x")]);
    }
}
