use crate::Error;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Deserialize};


/// A single gallery entry, as persisted in the photos database and returned by the API
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Photo {
    pub id: String,
    /// Base64 data URL of the image, opaque to the store
    pub data: String,
    pub file_name: String,
    #[serde(default)]
    pub file_type: String,
    #[serde(default)]
    pub description: String,
    pub upload_date: String,
}

impl Photo {
    /// Build a new record from an upload request, with the given id and creation time
    pub fn new(new_photo: NewPhoto, id: String, uploaded_at: DateTime<Utc>) -> Self {
        Self {
            id,
            data: new_photo.photo_data.unwrap_or_default(),
            file_name: new_photo.file_name.unwrap_or_default(),
            file_type: new_photo.file_type.unwrap_or_default(),
            description: new_photo.description.unwrap_or_default(),
            upload_date: format_upload_date(uploaded_at),
        }
    }
}


/// Body of an upload request. Every field may be absent or null on the wire, required
/// ones are checked by `validate()`.
#[derive(Deserialize, Default, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NewPhoto {
    pub photo_data: Option<String>,
    pub file_name: Option<String>,
    pub file_type: Option<String>,
    pub description: Option<String>,
}

impl NewPhoto {
    /// Make sure the photo data and its filename have been provided
    pub fn validate(&self) -> Result<(), Error> {
        let is_missing = |field: &Option<String>| field.as_deref().map_or(true, str::is_empty);
        if is_missing(&self.photo_data) || is_missing(&self.file_name) {
            Err(Error::ValidationError("Photo data and filename are required"))
        } else {
            Ok(())
        }
    }
}


/// Generate an id for a photo created at the given time : the millisecond timestamp,
/// bumped until it doesn't collide with any id in the given list
pub fn generate_id(existing_photos: &[Photo], uploaded_at: DateTime<Utc>) -> String {
    let mut candidate = uploaded_at.timestamp_millis();
    loop {
        let id = candidate.to_string();
        if !existing_photos.iter().any(|photo| photo.id == id) {
            break id;
        }
        candidate += 1;
    }
}

/// ISO-8601 UTC timestamp with millisecond precision, e.g. `2024-05-01T12:34:56.789Z`
pub fn format_upload_date(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}
