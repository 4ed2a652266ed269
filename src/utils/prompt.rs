//! User prompt utilities for interactive confirmation

use anyhow::Result;
use dialoguer::Confirm;

/// Ask user for yes/no confirmation
pub fn confirm(prompt: &str) -> Result<bool> {
    let result = Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()?;

    Ok(result)
}

/// Confirm unless the caller already approved or confirmation is disabled
pub fn confirm_unless(approved: bool, prompt: &str) -> Result<bool> {
    if approved {
        return Ok(true);
    }
    confirm(prompt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pre_approved_skips_prompt() {
        assert!(confirm_unless(true, "Apply?").unwrap());
    }
}
