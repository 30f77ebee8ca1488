use super::*;
use std::sync::atomic::{AtomicU64, Ordering};

/// Provider returning a fixed result, counting calls
struct FixedProvider {
    result: Result<Profile, IdentityError>,
    calls: AtomicU64,
}

impl FixedProvider {
    fn new(result: Result<Profile, IdentityError>) -> Arc<Self> {
        Arc::new(Self {
            result,
            calls: AtomicU64::new(0),
        })
    }
}

#[async_trait]
impl AuthProvider for FixedProvider {
    async fn current_profile(&self) -> Result<Profile, IdentityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

fn full_profile() -> Profile {
    Profile {
        id: Some("driver-1".to_string()),
        display_name: Some("Asha".to_string()),
        contact_identity: Some("asha@school.example".to_string()),
    }
}

#[tokio::test]
async fn resolves_and_caches_identity() {
    let provider = FixedProvider::new(Ok(full_profile()));
    let resolver = IdentityResolver::new(provider.clone());

    let first = resolver.resolve().await.unwrap();
    let second = resolver.resolve().await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.id, "driver-1");
    assert_eq!(first.contact_identity, "asha@school.example");
    // Cached: the provider was consulted once
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn not_authenticated_is_not_cached() {
    let provider = FixedProvider::new(Err(IdentityError::NotAuthenticated));
    let resolver = IdentityResolver::new(provider.clone());

    assert_eq!(
        resolver.resolve().await.unwrap_err(),
        IdentityError::NotAuthenticated
    );
    assert_eq!(
        resolver.resolve().await.unwrap_err(),
        IdentityError::NotAuthenticated
    );
    // Failures retry against the provider
    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn missing_contact_is_incomplete_profile() {
    let provider = FixedProvider::new(Ok(Profile {
        contact_identity: None,
        ..full_profile()
    }));
    let resolver = IdentityResolver::new(provider);

    assert_eq!(
        resolver.resolve().await.unwrap_err(),
        IdentityError::IncompleteProfile("contactIdentity")
    );
}

#[tokio::test]
async fn display_name_falls_back_to_id() {
    let provider = FixedProvider::new(Ok(Profile {
        display_name: None,
        ..full_profile()
    }));
    let resolver = IdentityResolver::new(provider);

    let identity = resolver.resolve().await.unwrap();
    assert_eq!(identity.display_name, "driver-1");
}
