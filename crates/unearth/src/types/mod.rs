//! The data model: names, artifact filenames, links and requirements.

mod artifact_name;
mod extra;
mod link;
mod package_name;
mod requirement;

pub use artifact_name::{
    ArtifactName, BuildTag, ParseArtifactNameError, SDistFilename, SDistFormat, WheelFilename,
};
pub use extra::{Extra, ParseExtraError};
pub use link::{
    parse_hash, ArtifactHashes, DistInfoMetadata, HashAlgorithm, Link, Meta, ProjectFile,
    ProjectInfo, UnknownHashAlgorithm, Yanked,
};
pub use package_name::{NormalizedPackageName, PackageName, ParsePackageNameError};
pub use requirement::{
    NamedRequirement, ParseRequirementError, Requirement, UrlRequirement, VcsRequirement,
};

pub use pep440_rs::{Version, VersionSpecifier, VersionSpecifiers};
