mod confirm;
mod downloads;
mod folders;
mod maps;

pub use confirm::{AutoConfirm, ConfirmAnswer, ConfirmRequest, Confirmer};
pub use downloads::{DownloadTracker, ProgressBar};
pub use folders::{
    SharedFolderAdd, VersionFolderLinker, SHARED_FOLDERS_KEY, SHARED_FOLDER_BLACKLIST, SHARED_FOLDER_WARNLIST,
};
pub use maps::{ArchiveProgress, DeleteMapsProgress, LocalMap, MapsManager, NOT_CONFIRM_DELETE_MAP_KEY};
