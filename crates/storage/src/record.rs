use serde::{Deserialize, Serialize};

/// A stored field record discovered by [`crate::StorageLocation::find_fields`].
///
/// `name` is the logical field name: any storage namespace prefix and the
/// key-reference marker have already been stripped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoundField {
    pub name: String,
    /// Number of rows stored under this name.
    pub rows: usize,
}

/// One entry of the migration history ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub name: String,
    pub description: String,
    pub batch: i64,
    /// RFC 3339 timestamp string.
    pub run_at: String,
}

/// A tenant of the installation.
///
/// Single-site installations have exactly one site (the main site, id 1)
/// whose table prefix equals the network prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub id: i64,
    pub path: String,
    /// Prefix of this site's own tables (`wp_`, `wp_2_`, ...).
    pub table_prefix: String,
    /// Prefix of network-wide tables (users, site registry, history).
    pub network_prefix: String,
}

impl Site {
    pub const MAIN_SITE_ID: i64 = 1;

    /// The main site of an installation using `network_prefix`.
    pub fn main(network_prefix: &str) -> Self {
        Site {
            id: Self::MAIN_SITE_ID,
            path: "/".to_string(),
            table_prefix: network_prefix.to_string(),
            network_prefix: network_prefix.to_string(),
        }
    }

    /// A secondary site; its tables live under `{network_prefix}{id}_`.
    pub fn secondary(id: i64, path: &str, network_prefix: &str) -> Self {
        if id == Self::MAIN_SITE_ID {
            return Self::main(network_prefix);
        }
        Site {
            id,
            path: path.to_string(),
            table_prefix: format!("{network_prefix}{id}_"),
            network_prefix: network_prefix.to_string(),
        }
    }

    /// Fully qualified name of a per-site table.
    pub fn table(&self, name: &str) -> String {
        format!("{}{}", self.table_prefix, name)
    }

    /// Fully qualified name of a network-wide table.
    pub fn network_table(&self, name: &str) -> String {
        format!("{}{}", self.network_prefix, name)
    }
}
