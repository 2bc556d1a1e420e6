use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use chrono::Utc;
use rand::seq::SliceRandom;
use rand::thread_rng;
use rocket::tokio::{fs, io::AsyncWriteExt, sync::Mutex};

use crate::config::Config;
use crate::photos::{self, NewPhoto, Photo};
use crate::Error;


/// The photos database : a single JSON file holding the whole ordered collection.
///
/// Every operation is a full read (and for writes, a full rewrite) of the file, no cache
/// is kept between calls. Writers are serialized by `write_lock` and the file is always
/// replaced atomically, so readers never see a partially written collection.
pub struct PhotoDB {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl PhotoDB {
    /// Create a handle on the database file located at the given path. Nothing is
    /// touched on disk until the first operation.
    pub fn new<P>(path: P) -> Self
        where P: AsRef<Path>
    {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    /// Create a handle on the database file configured in DATA_DIR
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.database_path())
    }

    /// Return every photo in upload order. This never fails : a missing, unreadable or
    /// corrupted file is reported as an empty collection.
    pub async fn list(&self) -> Vec<Photo> {
        if let Err(error) = self.ensure_data_dir().await {
            log::warn!("Unable to create the data directory : {}", error);
        }
        match self.load().await {
            Ok(photos) => photos,
            Err(error) => {
                log::warn!("Photos database is unreadable, serving an empty gallery : {}", error);
                vec![]
            }
        }
    }

    /// Return the first photo with the given id, if any. Same fail-open read as `list()`.
    pub async fn get(&self, id: &str) -> Option<Photo> {
        self.list().await
            .into_iter()
            .find(|photo| photo.id == id)
    }

    /// Create a new photo from the given upload request, add it at the end of the
    /// collection and return it
    pub async fn append(&self, new_photo: NewPhoto) -> Result<Photo, Error> {
        // Reject incomplete requests before touching the file
        new_photo.validate()?;

        let _guard = self.write_lock.lock().await;
        self.ensure_data_dir().await?;
        let mut photos = self.load().await?;

        let uploaded_at = Utc::now();
        let id = photos::generate_id(&photos, uploaded_at);
        let photo = Photo::new(new_photo, id, uploaded_at);
        photos.push(photo.clone());
        self.write(&photos).await?;

        log::info!("Photo \"{}\" added with id {}", photo.file_name, photo.id);
        Ok(photo)
    }

    /// Remove the first photo with the given id from the collection
    pub async fn remove(&self, id: &str) -> Result<(), Error> {
        let _guard = self.write_lock.lock().await;
        self.ensure_data_dir().await?;
        let mut photos = self.load().await?;

        let index = photos.iter()
            .position(|photo| photo.id == id)
            .ok_or_else(|| Error::NotFoundError(id.to_string()))?;
        photos.remove(index);
        self.write(&photos).await?;

        log::info!("Photo {} removed", id);
        Ok(())
    }

    /// Read and parse the whole collection. A missing file is an empty collection, but
    /// any other issue is returned to the caller so that write paths never overwrite a
    /// file they couldn't read.
    async fn load(&self) -> Result<Vec<Photo>, Error> {
        match fs::read_to_string(&self.path).await {
            Ok(content) => serde_json::from_str::<Vec<Photo>>(&content)
                .map_err(|e| Error::JsonError(e, self.path.clone())),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(vec![]),
            Err(error) => Err(Error::FileError(error, self.path.clone())),
        }
    }

    /// Replace the whole file with the given collection : write it to a temporary file
    /// next to it, then rename it over the old one
    async fn write(&self, photos: &[Photo]) -> Result<(), Error> {
        let content = serde_json::to_string_pretty(photos)
            .map_err(|e| Error::JsonError(e, self.path.clone()))?;

        let tmp_path = self.tmp_path();
        let result = match write_synced(&tmp_path, content.as_bytes()).await {
            Ok(()) => fs::rename(&tmp_path, &self.path).await,
            Err(error) => Err(error),
        };
        if let Err(error) = result {
            // Don't leave the partial file behind, the original is untouched anyway
            fs::remove_file(&tmp_path).await.ok();
            return Err(Error::FileError(error, self.path.clone()));
        }
        Ok(())
    }

    /// Path of a new temporary file in the same directory as the database, so that the
    /// final rename never crosses filesystems
    fn tmp_path(&self) -> PathBuf {
        let mut rng = thread_rng();
        let suffix = TMP_SUFFIX_CHARS.choose_multiple(&mut rng, TMP_SUFFIX_LENGTH)
            .map(|c| *c as char)
            .collect::<String>();
        let filename = self.path.file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.path.with_file_name(format!("{}.{}.tmp", filename, suffix))
    }

    /// Make sure the directory containing the database exists, and if not, try to create it
    async fn ensure_data_dir(&self) -> Result<(), Error> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => return Ok(()),
        };
        match fs::metadata(&dir).await {
            Ok(metadata) if metadata.is_dir() => Ok(()),

            // The given path exists but is not a directory so we can't create it
            Ok(_) => Err(Error::FileError(io::Error::new(
                ErrorKind::AlreadyExists,
                format!("\"{}\" is not a valid directory", dir.display())
            ), dir)),

            Err(error) if error.kind() == ErrorKind::NotFound => {
                log::info!("Creating empty directory \"{}\"", dir.display());
                fs::create_dir_all(&dir).await.map_err(|e| Error::FileError(e, dir.clone()))
            }

            Err(error) => Err(Error::FileError(error, dir)),
        }
    }
}


/// Write the given content to a new file and flush it to the disk, so that the rename
/// that follows can't expose an empty file after a power loss
async fn write_synced(path: &Path, content: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(content).await?;
    file.sync_all().await
}


// Chars used for the random suffix of temporary files
const TMP_SUFFIX_CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const TMP_SUFFIX_LENGTH: usize = 8;


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn new_db() -> (TempDir, PathBuf, PhotoDB) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("photos.json");
        let db = PhotoDB::new(&path);
        (dir, path, db)
    }

    fn upload(file_name: &str) -> NewPhoto {
        NewPhoto {
            photo_data: Some(format!("data:image/jpeg;base64,{}", file_name.len())),
            file_name: Some(file_name.to_string()),
            file_type: Some("image/jpeg".to_string()),
            description: Some(format!("caption for {}", file_name)),
        }
    }

    fn file_names(photos: &[Photo]) -> Vec<&str> {
        photos.iter().map(|photo| photo.file_name.as_str()).collect()
    }

    #[rocket::async_test]
    async fn appended_photo_is_listed() {
        let (_dir, _path, db) = new_db();
        let photo = db.append(upload("beach.jpg")).await.unwrap();

        assert!(!photo.id.is_empty());
        assert!(!photo.upload_date.is_empty());
        assert_eq!(photo.data, "data:image/jpeg;base64,9");
        assert_eq!(photo.file_type, "image/jpeg");
        assert_eq!(photo.description, "caption for beach.jpg");
        assert_eq!(db.list().await, vec![photo]);
    }

    #[rocket::async_test]
    async fn appends_keep_call_order() {
        let (_dir, _path, db) = new_db();
        for name in ["p1.jpg", "p2.jpg", "p3.jpg"] {
            db.append(upload(name)).await.unwrap();
        }
        assert_eq!(file_names(&db.list().await), vec!["p1.jpg", "p2.jpg", "p3.jpg"]);
    }

    #[rocket::async_test]
    async fn rapid_appends_get_distinct_ids() {
        let (_dir, _path, db) = new_db();
        let mut ids = Vec::new();
        for i in 0..20 {
            ids.push(db.append(upload(&format!("{}.jpg", i))).await.unwrap().id);
        }
        let mut unique = ids.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), ids.len());
    }

    #[rocket::async_test]
    async fn remove_deletes_exactly_one() {
        let (_dir, _path, db) = new_db();
        db.append(upload("a.jpg")).await.unwrap();
        let b = db.append(upload("b.jpg")).await.unwrap();
        db.append(upload("c.jpg")).await.unwrap();

        db.remove(&b.id).await.unwrap();
        assert_eq!(file_names(&db.list().await), vec!["a.jpg", "c.jpg"]);
    }

    #[rocket::async_test]
    async fn removing_twice_is_not_found_the_second_time() {
        let (_dir, _path, db) = new_db();
        let a = db.append(upload("a.jpg")).await.unwrap();

        assert!(db.remove(&a.id).await.is_ok());
        assert!(matches!(db.remove(&a.id).await, Err(Error::NotFoundError(id)) if id == a.id));
        assert!(db.list().await.is_empty());
    }

    #[rocket::async_test]
    async fn removing_unknown_id_leaves_collection_unchanged() {
        let (_dir, _path, db) = new_db();
        db.append(upload("a.jpg")).await.unwrap();
        let before = db.list().await;

        assert!(matches!(db.remove("does-not-exist").await, Err(Error::NotFoundError(_))));
        assert_eq!(db.list().await, before);
    }

    #[rocket::async_test]
    async fn list_is_empty_when_file_is_missing() {
        let (_dir, path, db) = new_db();
        assert!(db.list().await.is_empty());
        // The data directory is created on first access, but not the file
        assert!(path.parent().unwrap().is_dir());
        assert!(!path.exists());
    }

    #[rocket::async_test]
    async fn list_is_empty_when_file_is_corrupted() {
        let (_dir, path, db) = new_db();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();
        assert!(db.list().await.is_empty());

        std::fs::write(&path, r#"{"id": "1"}"#).unwrap();
        assert!(db.list().await.is_empty());
    }

    #[rocket::async_test]
    async fn append_refuses_to_overwrite_corrupted_file() {
        let (_dir, path, db) = new_db();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(db.append(upload("a.jpg")).await, Err(Error::JsonError(_, _))));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[rocket::async_test]
    async fn invalid_upload_does_not_alter_collection() {
        let (_dir, _path, db) = new_db();
        db.append(upload("a.jpg")).await.unwrap();
        let before = db.list().await;

        let mut missing_data = upload("b.jpg");
        missing_data.photo_data = Some(String::new());
        assert!(matches!(db.append(missing_data).await, Err(Error::ValidationError(_))));

        let mut missing_name = upload("c.jpg");
        missing_name.file_name = None;
        assert!(matches!(db.append(missing_name).await, Err(Error::ValidationError(_))));

        assert_eq!(db.list().await, before);
    }

    #[rocket::async_test]
    async fn writes_leave_no_temporary_files() {
        let (_dir, path, db) = new_db();
        let a = db.append(upload("a.jpg")).await.unwrap();
        db.append(upload("b.jpg")).await.unwrap();
        db.remove(&a.id).await.unwrap();

        let entries = std::fs::read_dir(path.parent().unwrap()).unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect::<Vec<String>>();
        assert_eq!(entries, vec!["photos.json".to_string()]);
    }

    #[rocket::async_test]
    async fn file_is_a_pretty_printed_array() {
        let (_dir, path, db) = new_db();
        let photo = db.append(upload("a.jpg")).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("[\n  {"));
        assert!(content.contains(&format!("\"id\": \"{}\"", photo.id)));
    }

    #[rocket::async_test]
    async fn synced_write_replaces_previous_content() {
        let (_dir, path, _db) = new_db();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "a much longer previous content").unwrap();

        write_synced(&path, b"[]").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[]");
    }

    #[rocket::async_test]
    async fn get_finds_photo_by_id() {
        let (_dir, _path, db) = new_db();
        let a = db.append(upload("a.jpg")).await.unwrap();
        assert_eq!(db.get(&a.id).await, Some(a));
        assert_eq!(db.get("unknown").await, None);
    }

    #[rocket::async_test]
    async fn data_dir_blocked_by_a_file_is_a_file_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data"), "").unwrap();
        let db = PhotoDB::new(dir.path().join("data").join("photos.json"));

        assert!(matches!(db.append(upload("a.jpg")).await, Err(Error::FileError(_, _))));
        assert!(db.list().await.is_empty());
    }
}
