//! Unearth finds and fetches Python package distributions. Given a
//! requirement — a name with version constraints, a direct artifact URL, or
//! a version-control reference — it collects every candidate link from the
//! configured indexes, find-links pages and local directories, filters and
//! ranks them against a target environment, and can download the chosen
//! artifact, unpack archives, and perform VCS checkouts. It is the half of a
//! package manager that sits between a resolver and an installer; resolving
//! dependency graphs and installing wheels are somebody else's business.
//!
//! The entry point is [`PackageFinder`]:
//!
//! ```no_run
//! use unearth::{PackageFinder, Requirement, Session};
//! use url::Url;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut finder = PackageFinder::new(Session::new()?);
//! finder.add_index_url(Url::parse("https://pypi.org/simple/")?);
//!
//! let requirement: Requirement = "flask>=2".parse()?;
//! let matches = finder.find_best_match(&requirement, None).await?;
//! if let Some(best) = &matches.best {
//!     println!("{best}");
//! }
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

pub mod download;
pub mod evaluator;
mod finder;
pub mod index;
pub mod tags;
pub mod types;
pub mod utils;
pub mod vcs;

pub use download::{
    download, download_and_unpack, unpack_archive, DownloadError, HashAllowList, HashMismatch,
    Unpacked, UnpackError,
};
pub use evaluator::{Candidate, Evaluator, FormatControl, LinkMismatch, NameSet, Rejection};
pub use finder::{BestMatch, FindError, PackageFinder};
pub use index::{FindLinks, Session, SessionOptions, Source};
pub use tags::{TargetPython, WheelTag, WheelTags};
pub use types::{
    ArtifactName, HashAlgorithm, Link, NormalizedPackageName, PackageName, ParseRequirementError,
    Requirement, Version, VersionSpecifiers,
};
pub use vcs::{VcsError, VcsKind};
