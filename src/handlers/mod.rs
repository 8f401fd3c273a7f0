pub mod auth;
pub mod lists;
pub mod notifications;
pub mod todos;

use crate::error::AppError;

fn require_title(title: &str) -> Result<(), AppError> {
    if title.trim().is_empty() {
        return Err(AppError::validation("Title cannot be empty"));
    }
    Ok(())
}

fn require_email(email: &str) -> Result<(), AppError> {
    if email.trim().is_empty() {
        return Err(AppError::validation("Email cannot be empty"));
    }
    Ok(())
}
