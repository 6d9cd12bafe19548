//! Typed wire messages. Every envelope is schema-validated into these records
//! at the boundary; nothing downstream touches raw JSON maps.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{DEVICE_MODEL, PROTOCOL_VERSION};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Mobile,
    Desktop,
    Headless,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransferProtocol {
    Http,
    Https,
}

impl TransferProtocol {
    pub fn scheme(self) -> &'static str {
        match self {
            TransferProtocol::Http => "http",
            TransferProtocol::Https => "https",
        }
    }
}

/// Outer beacon envelope. `data` carries the exact JSON string the HMAC was
/// computed over; verifiers must check against that string, never against a
/// reserialization of the parsed payload.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BeaconEnvelope {
    pub data: String,
    pub hmac: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BeaconPayload {
    pub alias: String,
    pub version: String,
    pub device_model: String,
    pub device_type: DeviceType,
    pub fingerprint: String,
    pub port: u16,
    pub protocol: TransferProtocol,
    pub download: bool,
    pub announcement: bool,
    pub announce: bool,
    pub code_hash: String,
    pub cli_session_id: Uuid,
    pub cli_mode: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Image,
    Video,
    Pdf,
    Text,
    Apk,
    Other,
}

impl FileType {
    /// Case-insensitive extension match; anything unknown maps to `Other`.
    pub fn from_name(name: &str) -> Self {
        let ext = name.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" | "png" | "gif" | "bmp" | "webp" | "heic" | "svg" => FileType::Image,
            "mp4" | "mov" | "avi" | "mkv" | "webm" | "m4v" => FileType::Video,
            "pdf" => FileType::Pdf,
            "txt" | "md" | "json" | "csv" | "log" | "xml" | "yaml" | "yml" | "toml" => {
                FileType::Text
            }
            "apk" => FileType::Apk,
            _ => FileType::Other,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct FileTimes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accessed: Option<u64>,
}

/// One advertised file. `file_name` is a relative path with forward slashes;
/// `size` is the on-disk size captured at scan time.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub id: Uuid,
    pub file_name: String,
    pub size: u64,
    pub file_type: FileType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<FileTimes>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub alias: String,
    pub version: String,
    pub device_model: String,
    pub device_type: DeviceType,
    pub fingerprint: String,
}

impl DeviceInfo {
    pub fn headless(alias: String, fingerprint: String) -> Self {
        Self {
            alias,
            version: PROTOCOL_VERSION.to_string(),
            device_model: DEVICE_MODEL.to_string(),
            device_type: DeviceType::Headless,
            fingerprint,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct InfoResponse {
    pub alias: String,
    pub version: String,
    pub device_model: String,
    pub device_type: DeviceType,
    pub fingerprint: String,
    pub download: bool,
}

/// `timestamp` is a unix-millisecond decimal string, `proof` the lowercase
/// hex HMAC over `<timestamp>:<server fingerprint>`.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CliAuth {
    pub timestamp: String,
    pub proof: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PrepareUploadRequest {
    pub info: DeviceInfo,
    #[serde(default)]
    pub files: BTreeMap<Uuid, FileMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cli_auth: Option<CliAuth>,
}

/// BTreeMap keeps manifest iteration order deterministic on both ends.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PrepareUploadResponse {
    pub session_id: Uuid,
    pub files: BTreeMap<Uuid, FileMetadata>,
}

/// Alias shown to the peer; falls back to a constant when the hostname is
/// unavailable.
pub fn default_alias() -> String {
    hostname::get().map_or_else(
        |_| "gust".to_string(),
        |h| h.to_string_lossy().to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_file() -> FileMetadata {
        FileMetadata {
            id: Uuid::new_v4(),
            file_name: "photos/a.jpg".to_string(),
            size: 2_485_760,
            file_type: FileType::Image,
            metadata: Some(FileTimes {
                modified: Some(1_722_600_000_000),
                accessed: None,
            }),
        }
    }

    #[test]
    fn test_file_metadata_roundtrip() {
        let original = sample_file();
        let json = serde_json::to_string(&original).unwrap();
        let parsed: FileMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(original, parsed);
    }

    #[test]
    fn test_wire_keys_are_camel_case() {
        let json = serde_json::to_string(&sample_file()).unwrap();
        assert!(json.contains("\"fileName\""));
        assert!(json.contains("\"fileType\""));

        let payload = BeaconPayload {
            alias: "host".into(),
            version: PROTOCOL_VERSION.into(),
            device_model: DEVICE_MODEL.into(),
            device_type: DeviceType::Headless,
            fingerprint: "ab".repeat(32),
            port: 53317,
            protocol: TransferProtocol::Https,
            download: true,
            announcement: true,
            announce: true,
            code_hash: "00".repeat(32),
            cli_session_id: Uuid::new_v4(),
            cli_mode: true,
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"codeHash\""));
        assert!(json.contains("\"cliSessionId\""));
        assert!(json.contains("\"cliMode\":true"));
        assert!(json.contains("\"deviceType\":\"headless\""));
        assert!(json.contains("\"protocol\":\"https\""));
    }

    #[test]
    fn test_prepare_upload_without_cli_auth_parses() {
        let json = r#"{"info":{"alias":"a","version":"2.1","deviceModel":"CLI","deviceType":"headless","fingerprint":"ff"},"files":{}}"#;
        let req: PrepareUploadRequest = serde_json::from_str(json).unwrap();
        assert!(req.cli_auth.is_none());
        assert!(req.files.is_empty());
    }

    #[test]
    fn test_file_type_inference() {
        assert_eq!(FileType::from_name("a.JPG"), FileType::Image);
        assert_eq!(FileType::from_name("clip.mkv"), FileType::Video);
        assert_eq!(FileType::from_name("doc.pdf"), FileType::Pdf);
        assert_eq!(FileType::from_name("notes.TXT"), FileType::Text);
        assert_eq!(FileType::from_name("app.apk"), FileType::Apk);
        assert_eq!(FileType::from_name("archive.tar.zst"), FileType::Other);
        assert_eq!(FileType::from_name("no_extension"), FileType::Other);
    }
}
