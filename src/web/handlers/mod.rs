pub mod error;
pub mod tokens;
pub mod unlock;

pub use error::TokenApiError;
pub use tokens::{issue_token, token_status};
pub use unlock::{confirm_unlock, unlock_page};
