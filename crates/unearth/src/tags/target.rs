use super::{WheelTag, WheelTags};
use pep440_rs::Version;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// The python implementation a target environment runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PythonImplementation {
    /// CPython, tag prefix `cp`.
    CPython,
    /// PyPy, tag prefix `pp`.
    PyPy,
    /// Jython, tag prefix `jy`.
    Jython,
    /// IronPython, tag prefix `ip`.
    IronPython,
    /// Anything else, carrying its own tag prefix.
    Other(String),
}

impl PythonImplementation {
    /// The tag prefix, e.g. `cp` for CPython.
    pub fn abbreviation(&self) -> &str {
        match self {
            PythonImplementation::CPython => "cp",
            PythonImplementation::PyPy => "pp",
            PythonImplementation::Jython => "jy",
            PythonImplementation::IronPython => "ip",
            PythonImplementation::Other(other) => other,
        }
    }
}

impl FromStr for PythonImplementation {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "cp" | "cpython" => PythonImplementation::CPython,
            "pp" | "pypy" => PythonImplementation::PyPy,
            "jy" | "jython" => PythonImplementation::Jython,
            "ip" | "ironpython" => PythonImplementation::IronPython,
            other => PythonImplementation::Other(other.to_string()),
        })
    }
}

impl Display for PythonImplementation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.abbreviation())
    }
}

/// Describes the environment candidates must be compatible with. It does not
/// have to describe the machine the finder runs on; cross-environment
/// queries are the whole point of making this configurable.
#[derive(Debug, Clone)]
pub struct TargetPython {
    /// Interpreter version digits, `major.minor[.patch]`.
    pub version: Vec<u32>,
    /// The implementation, determining the specific tag prefix.
    pub implementation: PythonImplementation,
    /// ABI tags, most specific first. Empty means "derive from the version".
    pub abis: Vec<String>,
    /// Platform tags, most specific first.
    pub platforms: Vec<String>,
}

impl Default for TargetPython {
    fn default() -> Self {
        Self {
            version: vec![3, 12],
            implementation: PythonImplementation::CPython,
            abis: Vec::new(),
            platforms: vec!["any".to_string()],
        }
    }
}

impl TargetPython {
    /// Creates a target for a cpython version on the given platforms.
    pub fn new(major: u32, minor: u32, platforms: Vec<String>) -> Self {
        Self {
            version: vec![major, minor],
            implementation: PythonImplementation::CPython,
            abis: Vec::new(),
            platforms,
        }
    }

    fn major(&self) -> u32 {
        self.version.first().copied().unwrap_or(3)
    }

    fn minor(&self) -> u32 {
        self.version.get(1).copied().unwrap_or(0)
    }

    /// The interpreter version as a PEP 440 version, used to check
    /// `requires-python` specifiers.
    pub fn python_version(&self) -> Version {
        let rendered = self
            .version
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(".");
        Version::from_str(&rendered).expect("interpreter version digits always form a version")
    }

    /// Enumerates the tags this target can install, most specific first.
    ///
    /// The enumeration follows the ordering pip derives for an interpreter:
    /// implementation-specific tags with each configured ABI, `abi3` wheels
    /// down through older minors (cpython 3 only), ABI-agnostic
    /// implementation tags, and finally the generic `py*` interpreter tags,
    /// first per platform and then platform-independent.
    pub fn supported_tags(&self) -> WheelTags {
        let mut tags = Vec::new();
        let major = self.major();
        let minor = self.minor();
        let impl_tag = format!("{}{}{}", self.implementation.abbreviation(), major, minor);

        let abis = if self.abis.is_empty() {
            vec![impl_tag.clone()]
        } else {
            self.abis.clone()
        };

        for abi in &abis {
            for platform in &self.platforms {
                tags.push(WheelTag::new(&impl_tag, abi, platform));
            }
        }

        if self.implementation == PythonImplementation::CPython && major >= 3 {
            for abi3_minor in (2..=minor).rev() {
                let interpreter = format!("cp{}{}", major, abi3_minor);
                for platform in &self.platforms {
                    tags.push(WheelTag::new(&interpreter, "abi3", platform));
                }
            }
        }

        for platform in &self.platforms {
            tags.push(WheelTag::new(&impl_tag, "none", platform));
        }

        // Generic interpreter tags: py310, py3, then py39 down to py30.
        let generic: Vec<String> = std::iter::once(format!("py{}{}", major, minor))
            .chain(std::iter::once(format!("py{}", major)))
            .chain((0..minor).rev().map(|m| format!("py{}{}", major, m)))
            .collect();

        for interpreter in &generic {
            for platform in &self.platforms {
                tags.push(WheelTag::new(interpreter, "none", platform));
            }
        }
        for interpreter in &generic {
            tags.push(WheelTag::new(interpreter, "none", "any"));
        }

        // The IndexSet keeps the first (highest priority) occurrence when a
        // platform list already contains "any".
        tags.into_iter().collect()
    }
}
