mod slack;
mod traits;

pub use slack::SlackProvider;
pub use traits::{OAuthProvider, TokenSet};
