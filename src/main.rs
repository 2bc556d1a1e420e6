#[macro_use] extern crate rocket;

mod config;
mod data_url;
mod db;
mod photos;

use config::Config;
use data_url::{DataUrl, DataUrlError};
use db::PhotoDB;
use photos::{NewPhoto, Photo};
use std::{io, fmt::Display};
use std::path::PathBuf;
use rocket::{Build, Rocket, State};
use rocket::data::{Limits, ToByteUnit};
use rocket::fs::{FileServer, Options};
use rocket::http::{ContentType, Header};
use rocket::response::status;
use rocket::serde::json::{self, Json};
use serde::Serialize;



#[launch]
fn rocket() -> _ {
    // Try to read the config file
    let config = Config::read_or_exit();

    build(config)
}


/// Assemble the Rocket instance for the given config
fn build(config: Config) -> Rocket<Build> {
    let figment = rocket::Config::figment()
        .merge(("address", &config.ADDRESS))
        .merge(("port", config.PORT))
        .merge(("limits", Limits::default().limit("json", config.MAX_UPLOAD_SIZE.mebibytes())));

    let db = PhotoDB::from_config(&config);

    rocket::custom(figment)
        .mount("/api", routes![
            list_photos,
            add_photo,
            delete_photo,
            delete_photo_without_id,
            get_photo,
            get_photo_image,
        ])
        .mount("/", FileServer::new(&config.STATIC_DIR, Options::Index | Options::Missing))
        .register("/api", catchers![api_not_found, api_internal_error])
        .manage(db)
}


/// Route handler returning every photo in upload order
#[get("/photos")]
async fn list_photos(db: &State<PhotoDB>) -> Json<Vec<Photo>> {
    Json(db.list().await)
}


/// Route handler storing a new photo sent as JSON, and returning the created record
#[post("/photos", data = "<body>")]
async fn add_photo(body: Result<Json<NewPhoto>, json::Error<'_>>, db: &State<PhotoDB>) -> Result<status::Created<Json<Photo>>, ApiError> {
    let new_photo = match body {
        Ok(new_photo) => new_photo.into_inner(),

        // Rocket reports a body truncated by the JSON limit as an unexpected EOF
        Err(json::Error::Io(error)) if error.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(ApiError::PayloadTooLarge(ErrorMessage::json("Request body is too large")));
        }
        Err(error) => {
            log::warn!("Rejected an invalid upload request : {}", error);
            return Err(ApiError::BadRequest(ErrorMessage::json("Invalid request body")));
        }
    };

    let photo = db.append(new_photo).await
        .map_err(|error| ApiError::from_error(error, "Failed to save photo"))?;
    let location = uri!("/api", get_photo(photo.id.as_str())).to_string();
    Ok(status::Created::new(location).body(Json(photo)))
}


/// Route handler removing the photo with the given id
#[delete("/photos/<id>")]
async fn delete_photo(id: &str, db: &State<PhotoDB>) -> Result<Json<StatusMessage>, ApiError> {
    db.remove(id).await
        .map_err(|error| ApiError::from_error(error, "Failed to delete photo"))?;
    Ok(Json(StatusMessage { message: "Photo deleted successfully" }))
}


/// Route handler for a delete request that doesn't specify which photo to remove
#[delete("/photos")]
fn delete_photo_without_id() -> ApiError {
    ApiError::BadRequest(ErrorMessage::json("Photo ID is required"))
}


/// Route handler returning the record of the photo with the given id
#[get("/photos/<id>")]
async fn get_photo(id: &str, db: &State<PhotoDB>) -> Result<Json<Photo>, ApiError> {
    db.get(id).await
        .map(Json)
        .ok_or_else(|| ApiError::from_error(Error::NotFoundError(id.to_string()), "Failed to fetch photo"))
}


/// Route handler serving the decoded image of the photo with the given id. Only raster
/// images are served, and always sandboxed since the payload comes from any client.
#[get("/photos/<id>/image")]
async fn get_photo_image(id: &str, db: &State<PhotoDB>) -> Result<ImageResponse, ApiError> {
    let photo = db.get(id).await
        .ok_or_else(|| ApiError::from_error(Error::NotFoundError(id.to_string()), "Failed to fetch photo"))?;
    let data_url = DataUrl::parse(&photo.data)
        .and_then(DataUrl::into_raster_image)
        .map_err(|error| ApiError::from_error(Error::DataUrlError(error), "Failed to fetch photo"))?;
    let content_type = ContentType::parse_flexible(&data_url.media_type).unwrap_or(ContentType::Binary);
    Ok(ImageResponse {
        bytes: data_url.bytes,
        content_type,
        csp: Header::new("Content-Security-Policy", "sandbox"),
        nosniff: Header::new("X-Content-Type-Options", "nosniff"),
    })
}


/// Decoded photo, with the headers preventing the browser from running it as a document
#[derive(Responder)]
pub struct ImageResponse {
    bytes: Vec<u8>,
    content_type: ContentType,
    csp: Header<'static>,
    nosniff: Header<'static>,
}


#[catch(404)]
fn api_not_found() -> Json<ErrorMessage> {
    ErrorMessage::json("Not found")
}

#[catch(500)]
fn api_internal_error() -> Json<ErrorMessage> {
    ErrorMessage::json("Internal server error")
}


/// Body of every error response of the API
#[derive(Serialize, Debug)]
pub struct ErrorMessage {
    error: &'static str,
}

impl ErrorMessage {
    pub fn json(error: &'static str) -> Json<Self> {
        Json(Self { error })
    }
}

/// Body of a successful response that has no data to return
#[derive(Serialize, Debug)]
pub struct StatusMessage {
    message: &'static str,
}


/// Responder used by the API routes to report a failure with the matching status
#[derive(Responder, Debug)]
pub enum ApiError {
    #[response(status = 400)]
    BadRequest(Json<ErrorMessage>),
    #[response(status = 404)]
    NotFound(Json<ErrorMessage>),
    #[response(status = 413)]
    PayloadTooLarge(Json<ErrorMessage>),
    #[response(status = 422)]
    UnprocessableEntity(Json<ErrorMessage>),
    #[response(status = 500)]
    Internal(Json<ErrorMessage>),
}

impl ApiError {
    /// Map a crate error to its response. Storage failures are logged and reported with
    /// the given generic message, without details.
    pub fn from_error(error: Error, failure_message: &'static str) -> Self {
        match error {
            Error::ValidationError(message) => ApiError::BadRequest(ErrorMessage::json(message)),
            Error::NotFoundError(_) => ApiError::NotFound(ErrorMessage::json("Photo not found")),
            Error::DataUrlError(DataUrlError::NotARasterImage(media_type)) => {
                log::warn!("{} : refusing to serve \"{}\" data as an image", failure_message, media_type);
                ApiError::UnprocessableEntity(ErrorMessage::json("Photo data is not a displayable image"))
            }
            Error::DataUrlError(error) => {
                log::warn!("{} : {}", failure_message, error);
                ApiError::UnprocessableEntity(ErrorMessage::json("Photo data is not a valid data URL"))
            }
            // Storage failures are only logged here, with the operation that failed
            error => {
                log::error!("{} : {}", failure_message, error);
                ApiError::Internal(ErrorMessage::json(failure_message))
            }
        }
    }
}


/// Generic error type used to uniformize errors across the crate
#[derive(Debug)]
pub enum Error {
    FileError(io::Error, PathBuf),
    JsonError(serde_json::Error, PathBuf),
    ParseError(toml::de::Error),
    ValidationError(&'static str),
    NotFoundError(String),
    DataUrlError(DataUrlError),
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::FileError(error, path) => write!(f, "file error for \"{}\" : {}", path.display(), error),
            Error::JsonError(error, path) => write!(f, "invalid JSON data in \"{}\" : {}", path.display(), error),
            Error::ParseError(error) => write!(f, "parser error : {}", error),
            Error::ValidationError(message) => write!(f, "invalid request : {}", message),
            Error::NotFoundError(id) => write!(f, "no photo with id \"{}\"", id),
            Error::DataUrlError(error) => write!(f, "invalid photo data : {}", error),
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Self {
        Error::ParseError(error)
    }
}
