//! Verification codes, login, registration and reauth tokens.

use palaver_store::{LoginOutcome, UserRecord, UserStore, UserStoreError};
use rand::Rng;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthFailure {
    #[error("Invalid Code")]
    InvalidCode,
    #[error("Wrong Password")]
    WrongPassword,
    #[error("Username taken")]
    UsernameTaken,
    #[error("Missing credentials")]
    MissingCredentials,
}

/// What a login submission resolved to.
pub enum AuthOutcome {
    /// An existing account authenticated. Carries the reauth token the
    /// client should present next time.
    Verified { user: UserRecord, token: String },
    /// A new account was created; the client must log in with the code
    /// still held for its address.
    Registered { uid: String },
    Failed(AuthFailure),
}

/// Fields a client may supply on `submit_login_verify`. Everything is
/// optional on the wire; which combination is present decides the path.
#[derive(Default)]
pub struct LoginSubmission {
    pub username: Option<String>,
    pub password: Option<String>,
    pub code: Option<String>,
    pub uid: Option<String>,
    pub token: Option<String>,
}

/// Issues per-address verification codes and uid-keyed reauth tokens, and
/// drives login/registration against the user store.
pub struct AuthService {
    users: Arc<UserStore>,
    codes: Mutex<HashMap<IpAddr, String>>,
    tokens: Mutex<HashMap<String, String>>,
}

impl AuthService {
    pub fn new(users: Arc<UserStore>) -> Self {
        Self {
            users,
            codes: Mutex::new(HashMap::new()),
            tokens: Mutex::new(HashMap::new()),
        }
    }

    fn lock_codes(&self) -> std::sync::MutexGuard<'_, HashMap<IpAddr, String>> {
        self.codes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_tokens(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.tokens
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mints a fresh six-digit code for this address, replacing any
    /// earlier one.
    pub fn issue_code(&self, addr: IpAddr) -> String {
        let code = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000u32));
        self.lock_codes().insert(addr, code.clone());
        code
    }

    /// Resolves a login submission. Token reauth is tried first; a valid
    /// uid/token pair authenticates without a code. A mismatched token
    /// falls through to the credential path silently.
    pub fn login(
        &self,
        addr: IpAddr,
        submission: LoginSubmission,
    ) -> Result<AuthOutcome, UserStoreError> {
        if let (Some(uid), Some(token)) = (&submission.uid, &submission.token) {
            let held = self.lock_tokens().get(uid).cloned();
            if held.as_deref() == Some(token.as_str()) {
                if let Some(user) = self.users.find_by_uid(uid) {
                    return Ok(AuthOutcome::Verified {
                        user,
                        token: token.clone(),
                    });
                }
            }
        }

        let (Some(username), Some(password)) = (&submission.username, &submission.password) else {
            return Ok(AuthOutcome::Failed(AuthFailure::MissingCredentials));
        };

        let code_ok = {
            let codes = self.lock_codes();
            matches!((codes.get(&addr), &submission.code), (Some(held), Some(sent)) if held == sent)
        };
        if !code_ok {
            return Ok(AuthOutcome::Failed(AuthFailure::InvalidCode));
        }

        match self.users.login(username, password) {
            LoginOutcome::Success(user) => {
                let token = palaver_types::new_id();
                self.lock_tokens().insert(user.uid.clone(), token.clone());
                // Codes are single-use once a login succeeds.
                self.lock_codes().remove(&addr);
                Ok(AuthOutcome::Verified { user, token })
            }
            LoginOutcome::WrongPassword => Ok(AuthOutcome::Failed(AuthFailure::WrongPassword)),
            LoginOutcome::Unknown => match self.users.register(username, password) {
                Ok(uid) => Ok(AuthOutcome::Registered { uid }),
                Err(UserStoreError::UsernameTaken(_)) => {
                    Ok(AuthOutcome::Failed(AuthFailure::UsernameTaken))
                }
                Err(err) => Err(err),
            },
        }
    }
}
