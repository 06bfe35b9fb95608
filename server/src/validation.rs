use crate::error::GenerateError;

/// Maximum prompt length, in characters
pub const MAX_PROMPT_CHARS: usize = 5000;

/// Reject prompts over [`MAX_PROMPT_CHARS`]. Empty prompts are allowed.
pub fn validate_prompt(prompt: &str) -> Result<(), GenerateError> {
    let len = prompt.chars().count();
    if len > MAX_PROMPT_CHARS {
        return Err(GenerateError::PromptTooLong {
            len,
            max: MAX_PROMPT_CHARS,
        });
    }
    Ok(())
}
