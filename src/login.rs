//! OAuth sign-in initiation.
//!
//! Thin glue over the identity provider: no retry, no state machine.

use tracing::{error, info};

use crate::error::OAuthInitiationError;
use crate::provider::{IdentityProvider, OAuthRedirect};

/// Ask the provider for an OAuth redirect that returns to `callback_url`.
///
/// # Errors
///
/// Wraps any provider failure in [`OAuthInitiationError`] carrying a
/// user-facing message.
pub async fn initiate_oauth_login(
    identity: &dyn IdentityProvider,
    provider: &str,
    callback_url: &str,
) -> Result<OAuthRedirect, OAuthInitiationError> {
    match identity.sign_in_with_oauth(provider, callback_url).await {
        Ok(redirect) => {
            info!(provider, "oauth sign-in initiated");
            Ok(redirect)
        }
        Err(source) => {
            error!(provider, error = %source, "oauth sign-in initiation failed");
            Err(OAuthInitiationError { provider: provider.to_owned(), source })
        }
    }
}
