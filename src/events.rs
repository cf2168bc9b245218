use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::path::PathBuf;
use std::time::SystemTime;

use serde::Serialize;

use crate::fs::FileKind;

/// Bit set shared by watch masks and delivered event flags.
///
/// The low byte holds change kinds, bits 16..24 describe the entry that
/// changed. Only change bits take part in mask matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct EventMask(u32);

impl EventMask {
    pub const NONE: Self = Self(0);
    pub const CREATED: Self = Self(0x0000_0001);
    pub const REMOVED: Self = Self(0x0000_0002);
    pub const RENAMED: Self = Self(0x0000_0004);
    pub const MODIFIED: Self = Self(0x0000_0008);
    /// Permissions, ownership, timestamps or extended attributes changed.
    pub const ATTRIBUTE: Self = Self(0x0000_0010);

    pub const IS_FILE: Self = Self(0x0001_0000);
    pub const IS_DIR: Self = Self(0x0002_0000);
    pub const IS_SYMLINK: Self = Self(0x0004_0000);

    /// Every change kind except `ATTRIBUTE`.
    pub const ALL: Self = Self(
        Self::CREATED.0 | Self::REMOVED.0 | Self::RENAMED.0 | Self::MODIFIED.0,
    );

    const CHANGE_BITS: u32 = 0x0000_00ff;

    const NAMES: [(Self, &'static str); 8] = [
        (Self::CREATED, "Created"),
        (Self::REMOVED, "Removed"),
        (Self::RENAMED, "Renamed"),
        (Self::MODIFIED, "Modified"),
        (Self::ATTRIBUTE, "Attribute"),
        (Self::IS_FILE, "IsFile"),
        (Self::IS_DIR, "IsDir"),
        (Self::IS_SYMLINK, "IsSymlink"),
    ];

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// The change kinds only, without entry-kind bits.
    pub const fn changes(self) -> Self {
        Self(self.0 & Self::CHANGE_BITS)
    }

    /// Parses a comma separated list such as `created,modified` or `all`.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut mask = Self::NONE;
        for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            mask |= match token.to_ascii_lowercase().as_str() {
                "all" => Self::ALL,
                "created" | "create" => Self::CREATED,
                "removed" | "remove" | "deleted" => Self::REMOVED,
                "renamed" | "rename" | "moved" => Self::RENAMED,
                "modified" | "modify" => Self::MODIFIED,
                "attribute" | "attrib" => Self::ATTRIBUTE,
                other => return Err(format!("unknown event kind '{other}'")),
            };
        }
        if mask.is_empty() {
            return Err(format!("empty event mask '{raw}'"));
        }
        Ok(mask)
    }
}

impl BitOr for EventMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for EventMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for EventMask {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl From<FileKind> for EventMask {
    fn from(kind: FileKind) -> Self {
        match kind {
            FileKind::File => EventMask::IS_FILE,
            FileKind::Directory => EventMask::IS_DIR,
            FileKind::Symlink => EventMask::IS_SYMLINK,
        }
    }
}

impl fmt::Display for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("None");
        }
        let mut first = true;
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str(", ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Identifier returned by `add_watch`. Ids start at 1 and are never reused
/// within one handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct WatchId(pub(crate) u64);

impl WatchId {
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileEvent {
    pub path: PathBuf,
    pub flags: EventMask,
    /// The watch whose registration matched this event.
    pub watch: WatchId,
    #[serde(skip)]
    pub timestamp: SystemTime,
}

impl FileEvent {
    pub fn new(path: PathBuf, flags: EventMask, watch: WatchId) -> Self {
        Self {
            path,
            flags,
            watch,
            timestamp: SystemTime::now(),
        }
    }
}
