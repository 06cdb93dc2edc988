use crate::{Error, Result};

/// Check a new password and its confirmation before anything is sent.
pub fn validate_new_password(new_password: &str, confirmation: &str) -> Result<()> {
    if new_password.is_empty() {
        return Err(Error::Validation(
            "new password must not be empty".to_string(),
        ));
    }
    if new_password != confirmation {
        return Err(Error::Validation("passwords do not match".to_string()));
    }
    Ok(())
}
