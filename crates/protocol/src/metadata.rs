//! Item metadata as returned by the remote, and the folder/file union.

use serde::{Deserialize, Deserializer, Serialize};

use crate::constants::FOLDER_MIME_TYPE;

/// Metadata of a remote item.
///
/// The remote encodes `size` as a decimal string; both strings and numbers
/// are accepted here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemMetadata {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<String>,
    #[serde(
        default,
        deserialize_with = "de_opt_u64",
        skip_serializing_if = "Option::is_none"
    )]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5_checksum: Option<String>,
}

impl ItemMetadata {
    /// Returns `true` if the remote flags this item as a folder.
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }
}

/// A remote item: either a container or a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriveItem {
    Folder(ItemMetadata),
    File(ItemMetadata),
}

impl DriveItem {
    pub fn is_folder(&self) -> bool {
        matches!(self, DriveItem::Folder(_))
    }

    pub fn metadata(&self) -> &ItemMetadata {
        match self {
            DriveItem::Folder(m) | DriveItem::File(m) => m,
        }
    }

    pub fn into_metadata(self) -> ItemMetadata {
        match self {
            DriveItem::Folder(m) | DriveItem::File(m) => m,
        }
    }

    pub fn id(&self) -> &str {
        &self.metadata().id
    }

    pub fn name(&self) -> &str {
        &self.metadata().name
    }

    /// First parent, if any.
    pub fn parent_id(&self) -> Option<&str> {
        self.metadata().parents.first().map(String::as_str)
    }
}

impl From<ItemMetadata> for DriveItem {
    fn from(meta: ItemMetadata) -> Self {
        if meta.is_folder() {
            DriveItem::Folder(meta)
        } else {
            DriveItem::File(meta)
        }
    }
}

/// Metadata sent when initiating an upload or creating an empty file.
///
/// The destination is fixed at initiation; renaming or reparenting an
/// in-flight upload is not supported by the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadMetadata {
    pub name: String,
    #[serde(default)]
    pub parents: Vec<String>,
}

impl UploadMetadata {
    pub fn new(name: impl Into<String>, parent_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parents: vec![parent_id.into()],
        }
    }
}

fn de_opt_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(u64),
        String(String),
    }

    match Option::<NumberOrString>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrString::Number(n)) => Ok(Some(n)),
        Some(NumberOrString::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_remote_file_reply() {
        let json = r#"{
            "id": "1AbC",
            "name": "report.pdf",
            "mimeType": "application/pdf",
            "parents": ["root-id"],
            "size": "1048576",
            "md5Checksum": "d41d8cd98f00b204e9800998ecf8427e"
        }"#;
        let meta: ItemMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.size, Some(1_048_576));
        assert_eq!(meta.parents, vec!["root-id".to_string()]);
        assert!(!meta.is_folder());

        let item = DriveItem::from(meta);
        assert!(!item.is_folder());
        assert_eq!(item.name(), "report.pdf");
        assert_eq!(item.parent_id(), Some("root-id"));
    }

    #[test]
    fn folder_mime_type_selects_folder_variant() {
        let json = r#"{"id":"f1","name":"Photos","mimeType":"application/vnd.google-apps.folder"}"#;
        let item = DriveItem::from(serde_json::from_str::<ItemMetadata>(json).unwrap());
        assert!(item.is_folder());
        assert_eq!(item.parent_id(), None);
    }

    #[test]
    fn numeric_size_is_accepted() {
        let meta: ItemMetadata = serde_json::from_str(r#"{"id":"x","size":12}"#).unwrap();
        assert_eq!(meta.size, Some(12));
        assert!(meta.md5_checksum.is_none());
    }

    #[test]
    fn non_numeric_size_is_rejected() {
        let result = serde_json::from_str::<ItemMetadata>(r#"{"id":"x","size":"big"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn upload_metadata_wire_shape() {
        let meta = UploadMetadata::new("a.bin", "parent-1");
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json, serde_json::json!({"name": "a.bin", "parents": ["parent-1"]}));
    }

    #[test]
    fn serialization_skips_absent_fields() {
        let meta = ItemMetadata {
            id: "x".into(),
            name: "n".into(),
            mime_type: String::new(),
            parents: Vec::new(),
            size: None,
            md5_checksum: None,
        };
        let json = serde_json::to_string(&meta).unwrap();
        assert_eq!(json, r#"{"id":"x","name":"n"}"#);
    }
}
