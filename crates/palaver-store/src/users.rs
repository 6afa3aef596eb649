//! The file-backed user (credential) store.
//!
//! This is the external collaborator the auth state machine checks
//! credentials against: a single JSON file rewritten whole on every
//! mutation. It has no coordination or ordering concerns beyond its own
//! mutex, and nothing here knows about sessions or connections.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;

/// Errors that can occur during user store operations.
#[derive(Debug, Error)]
pub enum UserStoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("username already taken: {0}")]
    UsernameTaken(String),
    #[error("no such user: {0}")]
    NotFound(String),
}

/// One registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub uid: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub avatar: String,
}

/// Result of a credential check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Username (or uid) and password both matched.
    Success(UserRecord),
    /// The username exists but the password does not match.
    WrongPassword,
    /// No user with that username or uid.
    Unknown,
}

/// JSON-file user store. uids are allocated sequentially as zero-padded
/// six-digit strings, so the first registration gets "000001".
pub struct UserStore {
    path: PathBuf,
    inner: Mutex<Vec<UserRecord>>,
}

impl UserStore {
    /// Opens the store, loading the user file if it exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, UserStoreError> {
        let path = path.into();
        let users = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            inner: Mutex::new(users),
        })
    }

    fn save(&self, users: &[UserRecord]) -> Result<(), UserStoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(users)?)?;
        Ok(())
    }

    /// Checks a login against the store. `login` may be a username or uid.
    pub fn login(&self, login: &str, password: &str) -> LoginOutcome {
        let users = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match users
            .iter()
            .find(|u| u.username == login || u.uid == login)
        {
            Some(user) if user.password == password => LoginOutcome::Success(user.clone()),
            Some(_) => LoginOutcome::WrongPassword,
            None => LoginOutcome::Unknown,
        }
    }

    /// Registers a new user, allocating the next sequential uid.
    pub fn register(&self, username: &str, password: &str) -> Result<String, UserStoreError> {
        let mut users = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if users.iter().any(|u| u.username == username) {
            return Err(UserStoreError::UsernameTaken(username.to_string()));
        }

        let next = users
            .iter()
            .filter_map(|u| u.uid.parse::<u64>().ok())
            .max()
            .unwrap_or(0)
            + 1;
        let uid = format!("{next:06}");
        users.push(UserRecord {
            uid: uid.clone(),
            username: username.to_string(),
            password: password.to_string(),
            avatar: String::new(),
        });
        self.save(&users)?;
        Ok(uid)
    }

    /// Every registered user, in registration order.
    pub fn all(&self) -> Vec<UserRecord> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn find_by_uid(&self, uid: &str) -> Option<UserRecord> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .find(|u| u.uid == uid)
            .cloned()
    }

    /// Finds a user by username, falling back to uid lookup so callers can
    /// pass either form.
    pub fn find_by_name_or_uid(&self, query: &str) -> Option<UserRecord> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .find(|u| u.username == query || u.uid == query)
            .cloned()
    }

    /// Applies profile changes to one user. `None` fields are untouched.
    /// Returns the updated record.
    pub fn update_profile(
        &self,
        uid: &str,
        new_username: Option<&str>,
        new_password: Option<&str>,
        new_avatar: Option<&str>,
    ) -> Result<UserRecord, UserStoreError> {
        let mut users = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(name) = new_username {
            if users.iter().any(|u| u.username == name && u.uid != uid) {
                return Err(UserStoreError::UsernameTaken(name.to_string()));
            }
        }

        let user = users
            .iter_mut()
            .find(|u| u.uid == uid)
            .ok_or_else(|| UserStoreError::NotFound(uid.to_string()))?;

        if let Some(name) = new_username {
            user.username = name.to_string();
        }
        if let Some(password) = new_password {
            user.password = password.to_string();
        }
        if let Some(avatar) = new_avatar {
            user.avatar = avatar.to_string();
        }
        let updated = user.clone();
        self.save(&users)?;
        Ok(updated)
    }
}
