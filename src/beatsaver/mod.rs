mod api;
mod resolver;
mod types;

pub use api::{BeatSaverApi, MapsApi};
pub use resolver::MapDetailsResolver;
pub use types::{ApiResponse, MapDetail, MapMetadata, MapUploader, MapVersion, SearchPage, SearchParams, SortOrder};
