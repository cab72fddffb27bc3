//! Commit authoring identity
//!
//! The user either signs in with GitHub (the OAuth result is consumed as an
//! opaque [`GitHubUser`]) or types a name and email by hand. A toggle picks
//! which one signs commits; exactly one is active at a time.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap_or_else(|e| panic!("invalid email regex: {e}"))
});

pub const EMPTY_FIELD: &str = "Field cannot be empty.";
pub const INVALID_EMAIL: &str = "Please input a valid email address";

/// A name/email pair as recorded in a commit signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Person {
    pub name: String,
    pub email: String,
}

impl Person {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    pub fn signature(&self) -> Result<git2::Signature<'static>, git2::Error> {
        git2::Signature::now(&self.name, &self.email)
    }
}

/// Profile returned by the GitHub sign-in flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitHubUser {
    pub name: String,
    pub email: String,
    pub avatar_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualUser {
    pub name: String,
    pub email: String,
}

/// Field-level validation failures for a manually entered identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    pub name: Option<&'static str>,
    pub email: Option<&'static str>,
}

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.email.is_none()
    }
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

impl ManualUser {
    /// Validates user input, reporting every failing field at once.
    pub fn validate(name: &str, email: &str) -> Result<Self, ValidationErrors> {
        let mut errors = ValidationErrors::default();
        if name.trim().is_empty() {
            errors.name = Some(EMPTY_FIELD);
        }
        if email.trim().is_empty() {
            errors.email = Some(EMPTY_FIELD);
        } else if !is_valid_email(email.trim()) {
            errors.email = Some(INVALID_EMAIL);
        }

        if errors.is_empty() {
            Ok(Self {
                name: name.trim().to_string(),
                email: email.trim().to_string(),
            })
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("no commit identity configured; sign in with GitHub or enter a name and email")]
    MissingIdentity,
}

/// Which identity signs commits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub use_github: bool,
    pub github_user: Option<GitHubUser>,
    pub manual_user: Option<ManualUser>,
}

impl IdentityConfig {
    pub fn manual(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            use_github: false,
            github_user: None,
            manual_user: Some(ManualUser {
                name: name.into(),
                email: email.into(),
            }),
        }
    }

    /// GitHub credentials only count when the toggle is on and a user signed in.
    pub fn is_github_active(&self) -> bool {
        self.use_github && self.github_user.is_some()
    }

    pub fn active(&self) -> Result<Person, IdentityError> {
        if self.use_github {
            if let Some(user) = &self.github_user {
                return Ok(Person::new(&user.name, &user.email));
            }
        }
        self.manual_user
            .as_ref()
            .map(|user| Person::new(&user.name, &user.email))
            .ok_or(IdentityError::MissingIdentity)
    }

    pub fn avatar_url(&self) -> Option<&str> {
        if self.is_github_active() {
            self.github_user.as_ref().map(|u| u.avatar_url.as_str())
        } else {
            None
        }
    }

    /// Flips the GitHub toggle. Does nothing until someone signs in.
    pub fn toggle_github(&mut self) -> bool {
        if self.github_user.is_none() {
            return false;
        }
        self.use_github = !self.use_github;
        true
    }

    pub fn sign_in(&mut self, user: GitHubUser) {
        self.github_user = Some(user);
        self.use_github = true;
    }

    pub fn set_manual(&mut self, name: &str, email: &str) -> Result<(), ValidationErrors> {
        self.manual_user = Some(ManualUser::validate(name, email)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn octocat() -> GitHubUser {
        GitHubUser {
            name: "The Octocat".to_string(),
            email: "octocat@github.com".to_string(),
            avatar_url: "https://avatars.githubusercontent.com/u/583231".to_string(),
        }
    }

    #[test]
    fn test_manual_identity_is_active_by_default() {
        let identity = IdentityConfig::manual("Jane Doe", "jane@example.com");
        assert_eq!(
            identity.active(),
            Ok(Person::new("Jane Doe", "jane@example.com"))
        );
        assert!(identity.avatar_url().is_none());
    }

    #[test]
    fn test_github_wins_when_toggled() {
        let mut identity = IdentityConfig::manual("Jane Doe", "jane@example.com");
        identity.sign_in(octocat());
        let person = identity.active().expect("identity should resolve");
        assert_eq!(person.email, "octocat@github.com");
        assert!(identity.avatar_url().is_some());

        assert!(identity.toggle_github());
        assert_eq!(
            identity.active().expect("identity should resolve").email,
            "jane@example.com"
        );
    }

    #[test]
    fn test_toggle_without_github_user_is_refused() {
        let mut identity = IdentityConfig::manual("Jane Doe", "jane@example.com");
        assert!(!identity.toggle_github());
        assert!(!identity.use_github);
    }

    #[test]
    fn test_toggle_on_without_user_falls_back_to_manual() {
        let identity = IdentityConfig {
            use_github: true,
            github_user: None,
            manual_user: Some(ManualUser {
                name: "Jane".to_string(),
                email: "jane@example.com".to_string(),
            }),
        };
        assert!(!identity.is_github_active());
        assert_eq!(identity.active().expect("manual fallback").name, "Jane");
    }

    #[test]
    fn test_missing_identity() {
        assert_eq!(
            IdentityConfig::default().active(),
            Err(IdentityError::MissingIdentity)
        );
    }

    #[test]
    fn test_validate_reports_each_field() {
        let errors = ManualUser::validate("", "").expect_err("both fields empty");
        assert_eq!(errors.name, Some(EMPTY_FIELD));
        assert_eq!(errors.email, Some(EMPTY_FIELD));

        let errors = ManualUser::validate("Jane", "not-an-email").expect_err("bad email");
        assert_eq!(errors.name, None);
        assert_eq!(errors.email, Some(INVALID_EMAIL));

        let user = ManualUser::validate(" Jane ", "jane@example.com ").expect("valid input");
        assert_eq!(user.name, "Jane");
        assert_eq!(user.email, "jane@example.com");
    }
}
