//! Wheels encode the interpreter, ABI and platform they support in their
//! filenames using compatibility tags. This module models individual tags,
//! ordered sets of tags supported by a target environment, and the
//! derivation of that set from a target description.

mod target;

pub use target::{PythonImplementation, TargetPython};

use indexmap::IndexSet;
use itertools::Itertools;
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

/// A single `{python}-{abi}-{platform}` tag triple.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct WheelTag {
    /// The interpreter tag, e.g. "cp310" or "py3".
    pub interpreter: String,

    /// The ABI tag, e.g. "cp310", "abi3" or "none".
    pub abi: String,

    /// The platform tag, e.g. "manylinux_2_17_x86_64" or "any".
    pub platform: String,
}

impl WheelTag {
    /// Convenience constructor from string-ish parts.
    pub fn new(
        interpreter: impl Into<String>,
        abi: impl Into<String>,
        platform: impl Into<String>,
    ) -> Self {
        Self {
            interpreter: interpreter.into(),
            abi: abi.into(),
            platform: platform.into(),
        }
    }
}

impl FromStr for WheelTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((interpreter, abi, platform)) = s.split('-').map(ToOwned::to_owned).collect_tuple()
        else {
            return Err(String::from("expected a triple of '-' separated tags"));
        };
        Ok(Self {
            interpreter,
            abi,
            platform,
        })
    }
}

impl Display for WheelTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}-{}", &self.interpreter, &self.abi, &self.platform)
    }
}

/// An ordered set of tags supported by a target environment, most specific
/// first. The position of a tag doubles as its priority when ranking wheels.
#[derive(Debug, Clone)]
pub struct WheelTags {
    tags: IndexSet<WheelTag>,
}

impl WheelTags {
    /// Returns an iterator over the supported tags, best first.
    pub fn tags(&self) -> impl Iterator<Item = &'_ WheelTag> + '_ {
        self.tags.iter()
    }

    /// The number of supported tags.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Determines the compatibility of the specified tag with this set.
    /// `None` means incompatible; `Some(i)` is a priority where a higher
    /// value means a more specific match, so the wheel with the highest
    /// compatibility should be preferred.
    pub fn compatibility(&self, tag: &WheelTag) -> Option<i32> {
        self.tags.get_index_of(tag).map(|score| -(score as i32))
    }

    /// Returns true if the specified tag is compatible with this set.
    pub fn is_compatible(&self, tag: &WheelTag) -> bool {
        self.tags.contains(tag)
    }
}

impl FromIterator<WheelTag> for WheelTags {
    fn from_iter<T: IntoIterator<Item = WheelTag>>(iter: T) -> Self {
        Self {
            tags: FromIterator::from_iter(iter),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_from_str() {
        let tag = WheelTag::from_str("py2-none-any").unwrap();
        assert_eq!(tag.interpreter, "py2");
        assert_eq!(tag.abi, "none");
        assert_eq!(tag.platform, "any");

        assert!(WheelTag::from_str("py2-none").is_err());
    }

    #[test]
    fn test_compatibility_prefers_earlier_tags() {
        let tags: WheelTags = [
            WheelTag::from_str("cp310-cp310-manylinux1_x86_64").unwrap(),
            WheelTag::from_str("cp310-none-any").unwrap(),
            WheelTag::from_str("py3-none-any").unwrap(),
        ]
        .into_iter()
        .collect();

        let specific = tags
            .compatibility(&"cp310-cp310-manylinux1_x86_64".parse().unwrap())
            .unwrap();
        let generic = tags.compatibility(&"py3-none-any".parse().unwrap()).unwrap();
        assert!(specific > generic);
        assert_eq!(tags.compatibility(&"cp39-cp39-win_amd64".parse().unwrap()), None);
    }
}
