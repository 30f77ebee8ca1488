use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

#[cfg(test)]
mod tests;

/// Raw profile as delivered by the auth collaborator.
///
/// Fields are optional here; [`IdentityResolver::resolve`] is the
/// validation point.
#[derive(Clone, Debug, Default)]
pub struct Profile {
    pub id: Option<String>,
    pub display_name: Option<String>,
    pub contact_identity: Option<String>,
}

/// Validated identity of the current agent
#[derive(Clone, Debug, PartialEq)]
pub struct Identity {
    pub id: String,
    pub display_name: String,
    pub contact_identity: String,
}

/// Identity resolution errors
#[derive(Debug, Clone, PartialEq)]
pub enum IdentityError {
    /// No session exists at the auth collaborator
    NotAuthenticated,
    /// A required profile field is absent
    IncompleteProfile(&'static str),
}

impl fmt::Display for IdentityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityError::NotAuthenticated => write!(f, "no authenticated session"),
            IdentityError::IncompleteProfile(field) => {
                write!(f, "profile is missing required field '{}'", field)
            }
        }
    }
}

impl std::error::Error for IdentityError {}

/// Auth collaborator boundary
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Profile of the currently authenticated agent, if any
    async fn current_profile(&self) -> Result<Profile, IdentityError>;
}

/// Resolves and caches the current agent's identity.
///
/// The provider is consulted at most once per resolver for a
/// successful resolution; failures are not cached, so a later call may
/// retry after the user signs in.
pub struct IdentityResolver {
    provider: Arc<dyn AuthProvider>,
    cached: OnceCell<Identity>,
}

impl IdentityResolver {
    pub fn new(provider: Arc<dyn AuthProvider>) -> Self {
        Self {
            provider,
            cached: OnceCell::new(),
        }
    }

    pub async fn resolve(&self) -> Result<Identity, IdentityError> {
        self.cached
            .get_or_try_init(|| async {
                let profile = self.provider.current_profile().await?;
                let identity = validate_profile(profile)?;
                info!(id = %identity.id, "Resolved agent identity");
                Ok(identity)
            })
            .await
            .cloned()
    }
}

/// Validates a raw profile into an [`Identity`].
///
/// Required: id and contact identity. The display name falls back to
/// the id when absent.
fn validate_profile(profile: Profile) -> Result<Identity, IdentityError> {
    let id = profile
        .id
        .filter(|v| !v.is_empty())
        .ok_or(IdentityError::IncompleteProfile("id"))?;

    let contact_identity = profile
        .contact_identity
        .filter(|v| !v.is_empty())
        .ok_or(IdentityError::IncompleteProfile("contactIdentity"))?;

    let display_name = profile
        .display_name
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| id.clone());

    Ok(Identity {
        id,
        display_name,
        contact_identity,
    })
}
