//! Crate-wide constants.
//!
//! TigerStyle: every limit is explicit, named, and bounded.

/// Default durable document path for the file engine.
pub const STORE_FILE_DEFAULT: &str = "file.json";

/// Extension of the scratch file written before the atomic rename.
pub const STORE_TMP_EXTENSION: &str = "tmp";

/// Maximum attribute key length in bytes.
pub const ATTRIBUTE_KEY_BYTES_MAX: usize = 256;

/// Maximum connections in the relational engine's pool.
pub const DB_POOL_CONNECTIONS_MAX: u32 = 10;

/// Timestamp wire format: ISO-8601 with microsecond precision.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Record field holding the entity id.
pub const RECORD_KEY_ID: &str = "id";

/// Record field holding the creation timestamp.
pub const RECORD_KEY_CREATED_AT: &str = "created_at";

/// Record field holding the last-save timestamp.
pub const RECORD_KEY_UPDATED_AT: &str = "updated_at";

/// Record field holding the type discriminator.
pub const RECORD_KEY_KIND: &str = "kind";
