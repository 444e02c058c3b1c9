//! Event stream position markers and their durable per-account storage.

use std::{
    fmt::Display,
    io,
    path::{Path, PathBuf},
};

use snafu::prelude::*;

/// Text stored on disk for [`Cursor::Seeded`].
pub const SEED_SENTINEL: &str = "SEED";

static CURSOR_FILE_NAME: &str = "cursor";

/// Position in the remote event stream.
///
/// The gateway never derives a token on its own, it only stores what the source returned.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Cursor {
    /// never synchronized
    #[default]
    Absent,
    /// synchronized at least once but the remote stream was empty
    Seeded,
    /// opaque token returned by the source
    Token(String),
}

impl Cursor {
    /// The token to send to the source when listing events, if any.
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Token(t) => Some(t.as_str()),
            _ => None,
        }
    }

    /// true if no synchronization has happened yet
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    fn parse(raw: &str) -> Self {
        match raw.trim() {
            "" => Self::Absent,
            SEED_SENTINEL => Self::Seeded,
            token => Self::Token(token.to_string()),
        }
    }

    fn serialize(&self) -> Option<&str> {
        match self {
            Self::Absent => None,
            Self::Seeded => Some(SEED_SENTINEL),
            Self::Token(t) => Some(t.as_str()),
        }
    }
}

impl Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Absent => f.write_str("<absent>"),
            Self::Seeded => f.write_str("<seed>"),
            Self::Token(t) => f.write_str(t),
        }
    }
}

/// Error when persist a cursor
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(error), context(suffix(false)))]
pub enum CursorStoreError {
    /// absent cursor can't be written
    #[snafu(display("refuse to persist an absent cursor for account {account}"))]
    AbsentCursor {
        /// account id
        account: String,
    },

    /// create the account directory failed
    #[snafu(display("create cursor directory {} failed: {source}", path.display()))]
    CreateDir {
        /// directory path
        path: PathBuf,
        /// source error
        source: io::Error,
    },

    /// write temporary file failed
    #[snafu(display("write cursor file {} failed: {source}", path.display()))]
    Write {
        /// file path
        path: PathBuf,
        /// source error
        source: io::Error,
    },

    /// replace the cursor file with the temporary file failed
    #[snafu(display("replace cursor file {} failed: {source}", path.display()))]
    Rename {
        /// file path
        path: PathBuf,
        /// source error
        source: io::Error,
    },
}

/// Cursor files, one per account, under a state directory.
///
/// Layout: `<root>/<account>/cursor`, containing the raw token or [`SEED_SENTINEL`].
#[derive(Debug, Clone)]
pub struct CursorStore {
    root: PathBuf,
}

impl CursorStore {
    /// Create a store rooted at `root`. Nothing is touched on disk until the first save.
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// root state directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the cursor file for an account.
    pub fn path(&self, account: &str) -> PathBuf {
        self.root
            .join(sanitize_account(account))
            .join(CURSOR_FILE_NAME)
    }

    /// Load the stored cursor. Missing, unreadable or empty files are [`Cursor::Absent`].
    pub async fn load(&self, account: &str) -> Cursor {
        let path = self.path(account);

        match tokio::fs::read(&path).await {
            Ok(data) => match String::from_utf8(data) {
                Ok(raw) => {
                    let cursor = Cursor::parse(&raw);
                    log::debug!("[{}] Loaded cursor {} from {}", account, cursor, path.display());
                    cursor
                }
                Err(_) => {
                    log::warn!(
                        "[{}] Cursor file {} is not utf-8, treat as absent",
                        account,
                        path.display()
                    );
                    Cursor::Absent
                }
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                log::debug!("[{}] No cursor file at {}", account, path.display());
                Cursor::Absent
            }
            Err(err) => {
                log::warn!(
                    "[{}] Read cursor file {} failed, treat as absent: {}",
                    account,
                    path.display(),
                    err
                );
                Cursor::Absent
            }
        }
    }

    /// Persist a cursor, replacing the previous value atomically.
    pub async fn try_save(&self, account: &str, cursor: &Cursor) -> Result<(), CursorStoreError> {
        let value = cursor
            .serialize()
            .with_context(|| error::AbsentCursor { account })?;

        let path = self.path(account);
        let dir = path.parent().unwrap_or(&self.root).to_path_buf();

        tokio::fs::create_dir_all(&dir)
            .await
            .context(error::CreateDir { path: &dir })?;

        let tmp = dir.join(format!("{}.tmp", CURSOR_FILE_NAME));
        tokio::fs::write(&tmp, value.as_bytes())
            .await
            .context(error::Write { path: &tmp })?;

        tokio::fs::rename(&tmp, &path)
            .await
            .context(error::Rename { path: &path })?;

        log::trace!("[{}] Persisted cursor {}", account, cursor);

        Ok(())
    }

    /// Persist a cursor, only logging a warning on failure.
    ///
    /// Returns whether the value reached disk. A failure means the events since the last
    /// successful save may be delivered again after a restart.
    pub async fn save(&self, account: &str, cursor: &Cursor) -> bool {
        match self.try_save(account, cursor).await {
            Ok(()) => true,
            Err(err) => {
                log::warn!("[{}] Persist cursor failed: {}", account, err);
                false
            }
        }
    }
}

fn sanitize_account(account: &str) -> String {
    let name: String = account
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();

    match name.as_str() {
        "" | "." | ".." => format!("_{}", name),
        _ => name,
    }
}
