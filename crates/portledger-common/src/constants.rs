//! System-wide constants and default paths.

use std::path::PathBuf;
use std::sync::OnceLock;

/// Default base directory for ledger data on Linux with root access.
pub const SYSTEM_DATA_DIR: &str = "/var/lib/portledger";

/// Returns the data directory, preferring `$HOME/.portledger` when it can
/// be created and falling back to `/var/lib/portledger`.
fn resolve_data_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        let user_dir = PathBuf::from(home).join(".portledger");
        if std::fs::create_dir_all(&user_dir).is_ok() {
            return user_dir;
        }
    }
    PathBuf::from(SYSTEM_DATA_DIR)
}

static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Returns the resolved data directory for this session.
pub fn data_dir() -> &'static PathBuf {
    DATA_DIR.get_or_init(resolve_data_dir)
}

/// Number of ports per ledger block directory.
///
/// Part of the on-disk layout. Changing it orphans every existing ledger.
pub const PORTS_PER_BLOCK: u16 = 100;

/// Device directory name under `ports/interfaces`.
pub const DEFAULT_DEVICE: &str = "1";

/// Consecutive fully-taken block passes before the allocator reports
/// exhaustion.
pub const MAX_EMPTY_PASSES: u32 = 3;

/// Lowest port handed out by default.
pub const DEFAULT_MIN_PORT: u16 = 4000;

/// Exclusive upper bound of the default allocation range.
pub const DEFAULT_MAX_PORT: u16 = 60000;

/// Prefix of the unit definition lines that record bound port pairs.
pub const PORT_MAPPING_PREFIX: &str = "X-PortMapping=";

/// Application name used in CLI output.
pub const APP_NAME: &str = "portledger";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "pld";
