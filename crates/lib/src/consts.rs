pub const APP_NAME: &str = "artiflow";

/// Prefix of ephemeral staging directories.
pub const EPHEMERAL_DIR_PREFIX: &str = "artiflow-";

/// Number of source-hash hex digits used for a generated working-copy prefix.
pub const GENERATED_PREFIX_LEN: usize = 12;

/// Marker inserted into the staged name of a conversion output.
pub const CONVERTED_MARKER: &str = "converted-";

/// Environment variable overriding where ephemeral staging directories live.
pub const STAGING_ROOT_ENV: &str = "ARTIFLOW_STAGING_ROOT";
