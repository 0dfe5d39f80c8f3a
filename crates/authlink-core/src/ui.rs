//! The narrow UI surface the handshake drives.
//!
//! Status text is fire-and-forget. Prompts resolve to the user's choice
//! and are cancelled by dropping the future, so implementations must
//! not hold resources that outlive a dropped prompt.

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum UiError {
    /// The user dismissed the prompt without choosing the action.
    #[error("prompt dismissed")]
    Dismissed,
    #[error("ui failure: {0}")]
    Failed(String),
}

/// One modal ask: explanatory text plus the single action needed.
#[derive(Debug, Clone)]
pub struct PromptArgs {
    pub title: String,
    pub body: String,
    /// Label of the action button, e.g. "Open authenticator".
    pub action: String,
}

/// The action button was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptResponse;

#[async_trait]
pub trait UserInterface: Send + Sync {
    /// Update the status line for the current flow.
    fn status(&self, text: &str);

    /// Show a modal prompt and wait for the user. Dropping the returned
    /// future dismisses the prompt.
    async fn prompt(&self, args: PromptArgs) -> Result<PromptResponse, UiError>;
}
