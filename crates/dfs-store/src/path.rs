use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// Width of each directory token produced by [`CasTransform`].
pub const DEFAULT_TOKEN_WIDTH: usize = 5;

/// Resolved on-disk position of an object, relative to the store root.
///
/// A `Location` is never persisted. It is recomputed from the key on every
/// operation, so the transform that produced it must be a pure function.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Location {
    /// Directory segments, outermost first.
    pub directory: Vec<String>,
    /// File name inside the innermost directory.
    pub filename: String,
}

impl Location {
    pub fn new(directory: Vec<String>, filename: impl Into<String>) -> Self {
        Self {
            directory,
            filename: filename.into(),
        }
    }

    /// Directory part as a relative path.
    pub fn directory_path(&self) -> PathBuf {
        self.directory.iter().collect()
    }

    /// Directory plus file name as a relative path.
    pub fn full_path(&self) -> PathBuf {
        let mut path = self.directory_path();
        path.push(&self.filename);
        path
    }

    /// The outermost directory segment: the shard this object lives in.
    pub fn first_segment(&self) -> Option<&str> {
        self.directory.first().map(String::as_str)
    }

    /// Returns `true` if the location stays below whatever root it is joined to.
    pub fn is_contained(&self) -> bool {
        if self.filename.is_empty() {
            return false;
        }
        let full = self.full_path();
        !full.as_os_str().is_empty()
            && full
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
    }

    /// Join this location onto a store root.
    pub fn under(&self, root: &Path) -> PathBuf {
        root.join(self.full_path())
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.directory.join("/"), self.filename)
    }
}

/// Strategy mapping a logical key to its [`Location`].
///
/// Implementations must be deterministic: the same key always yields the
/// same location, across calls and across processes.
pub trait PathTransform: Send + Sync {
    fn transform(&self, key: &str) -> Location;

    /// Short name used in logs and configuration.
    fn name(&self) -> &'static str;
}

/// Stores each object at `<key>/<key>`.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityTransform;

impl PathTransform for IdentityTransform {
    fn transform(&self, key: &str) -> Location {
        Location::new(vec![key.to_string()], key)
    }

    fn name(&self) -> &'static str {
        "identity"
    }
}

/// Content-addressed layout.
///
/// The SHA-1 digest of the key is rendered as 40 lowercase hex characters,
/// split into fixed-width tokens that form the directory path, and the full
/// hex string becomes the file name. With the default width of 5 this gives
/// eight directory levels of at most `16^5` entries each.
#[derive(Clone, Copy, Debug)]
pub struct CasTransform {
    token_width: usize,
}

impl CasTransform {
    pub const fn new() -> Self {
        Self {
            token_width: DEFAULT_TOKEN_WIDTH,
        }
    }

    /// Use a custom token width. Values outside `1..=40` are clamped.
    pub fn with_token_width(token_width: usize) -> Self {
        Self {
            token_width: token_width.clamp(1, 40),
        }
    }

    pub fn token_width(&self) -> usize {
        self.token_width
    }

    /// Lowercase hex SHA-1 of the key.
    pub fn digest_hex(key: &str) -> String {
        hex::encode(Sha1::digest(key.as_bytes()))
    }
}

impl Default for CasTransform {
    fn default() -> Self {
        Self::new()
    }
}

impl PathTransform for CasTransform {
    fn transform(&self, key: &str) -> Location {
        let digest = Self::digest_hex(key);
        // Hex is ASCII, so byte chunks are always valid UTF-8.
        let directory = digest
            .as_bytes()
            .chunks(self.token_width)
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
            .collect();
        Location::new(directory, digest)
    }

    fn name(&self) -> &'static str {
        "cas"
    }
}

/// Configuration-level selector for the built-in transforms.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformKind {
    #[default]
    Cas,
    Identity,
}

impl TransformKind {
    pub fn build(self) -> std::sync::Arc<dyn PathTransform> {
        match self {
            Self::Cas => std::sync::Arc::new(CasTransform::new()),
            Self::Identity => std::sync::Arc::new(IdentityTransform),
        }
    }
}

impl std::str::FromStr for TransformKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cas" => Ok(Self::Cas),
            "identity" => Ok(Self::Identity),
            other => Err(format!("unknown path transform: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn cas_transform_known_fixture() {
        let location = CasTransform::new().transform("test_folder_1");
        assert_eq!(
            location.directory.join("/"),
            "753ba/205f2/11917/3e905/f67d5/4ea62/37418/3ca04"
        );
        assert_eq!(location.filename, "753ba205f2119173e905f67d54ea62374183ca04");
    }

    #[test]
    fn cas_filename_matches_independent_digest() {
        let key = "some/object/key";
        let expected = hex::encode(Sha1::digest(key.as_bytes()));
        let location = CasTransform::new().transform(key);
        assert_eq!(location.filename, expected);
        assert_eq!(location.directory.concat(), expected);
    }

    #[test]
    fn identity_transform_uses_key_for_both_parts() {
        let location = IdentityTransform.transform("photo.png");
        assert_eq!(location.directory, vec!["photo.png".to_string()]);
        assert_eq!(location.filename, "photo.png");
        assert_eq!(location.first_segment(), Some("photo.png"));
    }

    #[test]
    fn custom_token_width_is_clamped() {
        assert_eq!(CasTransform::with_token_width(0).token_width(), 1);
        assert_eq!(CasTransform::with_token_width(100).token_width(), 40);
        let location = CasTransform::with_token_width(8).transform("abc");
        assert_eq!(location.directory.len(), 5);
    }

    #[test]
    fn containment_rejects_traversal() {
        assert!(!IdentityTransform.transform("..").is_contained());
        assert!(!IdentityTransform.transform("").is_contained());
        assert!(!IdentityTransform.transform("/etc/passwd").is_contained());
        assert!(IdentityTransform.transform("plain").is_contained());
        assert!(CasTransform::new().transform("../../x").is_contained());
    }

    #[test]
    fn transform_kind_parses_and_builds() {
        assert_eq!("cas".parse::<TransformKind>().unwrap(), TransformKind::Cas);
        assert_eq!(
            "identity".parse::<TransformKind>().unwrap(),
            TransformKind::Identity
        );
        assert!("sha".parse::<TransformKind>().is_err());
        assert_eq!(TransformKind::Identity.build().name(), "identity");
        assert_eq!(TransformKind::default().build().name(), "cas");
    }

    #[test]
    fn display_joins_with_slashes() {
        let location = Location::new(vec!["a".into(), "b".into()], "c");
        assert_eq!(location.to_string(), "a/b/c");
    }

    proptest! {
        #[test]
        fn cas_transform_is_deterministic(key in ".*") {
            let t = CasTransform::new();
            prop_assert_eq!(t.transform(&key), t.transform(&key));
        }

        #[test]
        fn cas_transform_shape_is_fixed(key in ".{0,256}") {
            let location = CasTransform::new().transform(&key);
            prop_assert_eq!(location.directory.len(), 8);
            prop_assert!(location.directory.iter().all(|s| s.len() == DEFAULT_TOKEN_WIDTH));
            prop_assert_eq!(location.filename.len(), 40);
            prop_assert!(location.filename.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }
    }
}
