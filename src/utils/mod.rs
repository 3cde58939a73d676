//! Pure utility functions.
//!
//! These are stateless helpers used across the codebase.

pub mod bootstrap;
pub mod retry;

/// Mask the local part of an email for logs: `asha@example.com` -> `as***@example.com`.
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let head: String = local.chars().take(2).collect();
            format!("{head}***@{domain}")
        }
        None => "***".to_string(),
    }
}
