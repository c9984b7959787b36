mod diff;
mod manifest;
mod version;

pub use diff::{compute_diff, FileDiff};
pub use manifest::{
    hash_directory, hash_directory_until, hash_file, is_reserved_name, is_safe_relative_path,
    read_manifest, relative_key, write_manifest, FileHash, FileHashes, Manifest,
    MANIFEST_FILE_NAME, RESERVED_FILE_NAMES,
};
pub use version::parse_version;
