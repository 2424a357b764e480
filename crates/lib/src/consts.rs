pub const APP_NAME: &str = "envbake";

/// Length of the truncated hashes used for plan and layer identifiers.
pub const OBJ_HASH_PREFIX_LEN: usize = 20;

/// Default descriptor file name looked up in the build context.
pub const DESCRIPTOR_FILENAME: &str = "Bakefile";

/// Ignore file read from the build context root.
pub const IGNORE_FILENAME: &str = ".bakeignore";

/// Metadata file describing a base artifact's pre-installed packages.
pub const ARTIFACT_METADATA_FILENAME: &str = "artifact.json";

/// Directory inside a base artifact holding its filesystem tree.
pub const ARTIFACT_ROOTFS_DIR: &str = "rootfs";

/// Dependency list inside a package index entry.
pub const REQUIRES_FILENAME: &str = "requires.txt";

/// Where installed packages land inside the snapshot unless configured otherwise.
pub const DEFAULT_SITE_DIR: &str = "/usr/local/lib/site-packages";

pub const DEFAULT_DIR_MODE: u32 = 0o755;
pub const DEFAULT_FILE_MODE: u32 = 0o644;
