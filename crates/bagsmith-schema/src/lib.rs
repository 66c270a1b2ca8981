//! Data model for bagsmith: checksum algorithms, ordered bag-info metadata,
//! the source entity layout, and BagIt profile documents.
//!
//! Profiles are parsed into a `ProfileDocument` (serde model) and compiled into
//! an immutable `RuleSet` that the validator evaluates against packages.

pub mod algorithm;
pub mod baginfo;
pub mod entity;
pub mod profile;
pub mod rules;
pub mod types;

pub use algorithm::{manifest_algorithm, tag_manifest_algorithm, ChecksumAlgorithm, UnsupportedAlgorithm};
pub use baginfo::{is_valid_tag_name, BagInfo, BagInfoError, BAGGING_DATE, PAYLOAD_OXUM, PROFILE_IDENTIFIER};
pub use entity::{Entity, EntityError, DEFAULT_SOURCE_METADATA, META_DIR, PAYLOAD_DIR};
pub use profile::{
    parse_profile_file, parse_profile_str, FolderSpec, ProfileDocument, ProfileError, ProfileInfo,
    SerializationPolicy, TagSpec,
};
pub use rules::{AlgorithmPolicy, FolderRule, PathPattern, RuleSet, TagRule, ValueMatcher};
pub use types::{PluginContext, PluginName, ProfileId};
