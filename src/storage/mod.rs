pub mod files;
pub mod matching;
pub mod rest;
pub mod upload;

pub use files::{write_csv, write_document, write_json};
pub use matching::NaturalKeyIndex;
pub use rest::{RestClient, TableClient};
pub use upload::{BatchUploader, UploadReport};
