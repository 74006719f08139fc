//! Trigger events naming the objects to tokenize.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{TokenVaultError, TokenVaultResult};

/// An object in a storage location (bucket) to process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Storage location, e.g. a bucket name.
    pub location: String,
    /// Object key within the location.
    pub key: String,
}

impl ObjectRef {
    /// Creates a reference to `key` in `location`.
    pub fn new(location: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            key: key.into(),
        }
    }

    /// The key as a relative path, rejecting keys that escape their location.
    ///
    /// # Errors
    ///
    /// Returns [`TokenVaultError::InvalidEvent`] for empty, absolute or
    /// parent-relative keys.
    pub fn key_path(&self) -> TokenVaultResult<PathBuf> {
        relative_path(&self.key, "object key")
    }

    /// The location as a relative path.
    ///
    /// # Errors
    ///
    /// Returns [`TokenVaultError::InvalidEvent`] for empty, absolute or
    /// parent-relative locations.
    pub fn location_path(&self) -> TokenVaultResult<PathBuf> {
        relative_path(&self.location, "location")
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.location, self.key)
    }
}

fn relative_path(raw: &str, label: &str) -> TokenVaultResult<PathBuf> {
    let path = Path::new(raw);
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(TokenVaultError::InvalidEvent(format!(
                    "{label} {raw:?} escapes its location"
                )));
            }
        }
    }
    if out.as_os_str().is_empty() {
        return Err(TokenVaultError::InvalidEvent(format!("{label} is empty")));
    }
    Ok(out)
}

/// A batch of objects delivered by the trigger, processed in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerEvent {
    /// Objects to process.
    pub objects: Vec<ObjectRef>,
}

#[derive(Deserialize)]
struct Notification {
    #[serde(rename = "Records", default)]
    records: Vec<NotificationRecord>,
}

#[derive(Deserialize)]
struct NotificationRecord {
    s3: NotificationEntity,
}

#[derive(Deserialize)]
struct NotificationEntity {
    bucket: NotificationBucket,
    object: NotificationObject,
}

#[derive(Deserialize)]
struct NotificationBucket {
    name: String,
}

#[derive(Deserialize)]
struct NotificationObject {
    key: String,
}

impl TriggerEvent {
    /// Event for a single object.
    pub fn single(location: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            objects: vec![ObjectRef::new(location, key)],
        }
    }

    /// Parses an object-storage change notification.
    ///
    /// # Errors
    ///
    /// Returns [`TokenVaultError::InvalidEvent`] if the payload is not a
    /// notification or carries no records.
    pub fn from_notification_json(json: &str) -> TokenVaultResult<Self> {
        let notification: Notification = serde_json::from_str(json)
            .map_err(|err| TokenVaultError::InvalidEvent(err.to_string()))?;
        if notification.records.is_empty() {
            return Err(TokenVaultError::InvalidEvent(
                "notification has no records".to_string(),
            ));
        }
        Ok(Self {
            objects: notification
                .records
                .into_iter()
                .map(|record| ObjectRef::new(record.s3.bucket.name, record.s3.object.key))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_notification() {
        let json = r#"{
            "Records": [
                {"eventName": "ObjectCreated:Put",
                 "s3": {"bucket": {"name": "uploads", "arn": "arn:x"},
                        "object": {"key": "2024/accounts.csv", "size": 12}}},
                {"s3": {"bucket": {"name": "uploads"}, "object": {"key": "b.csv"}}}
            ]
        }"#;
        let event = TriggerEvent::from_notification_json(json).expect("parse");
        assert_eq!(
            event.objects,
            vec![
                ObjectRef::new("uploads", "2024/accounts.csv"),
                ObjectRef::new("uploads", "b.csv"),
            ]
        );
        assert_eq!(event.objects[0].to_string(), "uploads/2024/accounts.csv");
    }

    #[test]
    fn test_empty_notification_is_invalid() {
        assert!(matches!(
            TriggerEvent::from_notification_json(r#"{"Records": []}"#),
            Err(TokenVaultError::InvalidEvent(_))
        ));
        assert!(matches!(
            TriggerEvent::from_notification_json("not json"),
            Err(TokenVaultError::InvalidEvent(_))
        ));
    }

    #[test]
    fn test_key_path_rejects_escapes() {
        assert_eq!(
            ObjectRef::new("b", "./in/a.csv").key_path().expect("path"),
            PathBuf::from("in/a.csv")
        );
        for key in ["../a.csv", "/etc/passwd", "in/../../a.csv", ""] {
            assert!(
                ObjectRef::new("b", key).key_path().is_err(),
                "key {key:?} should be rejected"
            );
        }
    }
}
