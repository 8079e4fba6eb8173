use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

/// Reads `null` as the field's default, like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// Docker Hub repository metadata
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Repository {
    #[serde(deserialize_with = "null_as_default")]
    pub user: String,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub namespace: String,
    pub repository_type: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub status: i64,
    pub description: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub is_private: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub is_automated: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub can_edit: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub star_count: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub pull_count: u64,
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "null_as_default")]
    pub is_migrated: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub collaborator_count: u64,
    pub affiliation: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub hub_user: String,
}

/// Per-platform image behind a tag
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Image {
    #[serde(deserialize_with = "null_as_default")]
    pub architecture: String,
    pub variant: Option<String>,
    pub digest: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub os: String,
    pub os_version: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub size: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub status: String,
    pub last_pulled: Option<DateTime<Utc>>,
    pub last_pushed: Option<DateTime<Utc>>,
}

/// Docker Hub tag metadata
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Tag {
    #[serde(deserialize_with = "null_as_default")]
    pub id: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub creator: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub images: Vec<Image>,
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "null_as_default")]
    pub last_updater: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub last_updater_username: String,
    #[serde(deserialize_with = "null_as_default")]
    pub repository: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub full_size: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub v2: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub tag_status: String,
    pub tag_last_pulled: Option<DateTime<Utc>>,
    pub tag_last_pushed: Option<DateTime<Utc>>,
}

impl Tag {
    /// Shorthand used by tests and fakes.
    pub fn new(name: impl Into<String>, last_updated: Option<DateTime<Utc>>) -> Self {
        Tag {
            name: name.into(),
            last_updated,
            ..Tag::default()
        }
    }
}

/// One page of a paginated listing
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct Page<T> {
    #[serde(default, deserialize_with = "null_as_default")]
    pub count: u64,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub results: Vec<T>,
}
