use crate::models::identity::{EnsProfile, Identity};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument, warn};

pub const ENS_API_ENDPOINT: &str = "https://ens-api.slobo.xyz/address";

/// Maps an address to display metadata. Implementations never fail: anything
/// that goes wrong resolves to [`Identity::unresolved`].
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, address: &str) -> Identity;
}

/// Resolves ENS names and Twitter text records through the ENS profile API.
#[derive(Clone)]
pub struct EnsResolver {
    client: Client,
    endpoint: String,
}

impl EnsResolver {
    pub fn new_with_endpoint(client: Client, endpoint: String) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    async fn fetch_profile(&self, address: &str) -> Result<EnsProfile> {
        let url = format!("{}/{}", self.endpoint, address);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("ENS request failed")?
            .error_for_status()
            .context("ENS API returned an error status")?;

        response
            .json::<EnsProfile>()
            .await
            .context("Failed to parse ENS profile")
    }
}

#[async_trait]
impl IdentityResolver for EnsResolver {
    #[instrument(name = "resolve_identity", skip(self))]
    async fn resolve(&self, address: &str) -> Identity {
        match self.fetch_profile(address).await {
            Ok(profile) => {
                let identity = profile.into_identity(address);
                debug!(resolved = identity.is_resolved(), "Identity lookup finished");
                identity
            }
            Err(e) => {
                warn!(error = %e, error_chain = ?e, "Identity lookup failed, using raw address");
                Identity::unresolved(address)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;
    use std::time::Duration;

    const ADDRESS: &str = "0xABCD000000000000000000000000000000001234";

    #[tokio::test]
    async fn test_resolve_name_and_twitter() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", format!("/address/{ADDRESS}").as_str())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"name":"nick.eth","texts":{"com.twitter":"nicksdjohnson"}}"#)
            .create_async()
            .await;

        let resolver =
            EnsResolver::new_with_endpoint(Client::new(), format!("{}/address", server.url()));
        let identity = resolver.resolve(ADDRESS).await;

        assert_eq!(
            identity,
            Identity::Resolved {
                name: "nick.eth".to_string(),
                social_handle: Some("nicksdjohnson".to_string()),
            }
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_resolve_without_name_or_texts() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", format!("/address/{ADDRESS}").as_str())
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let resolver =
            EnsResolver::new_with_endpoint(Client::new(), format!("{}/address/", server.url()));

        assert_eq!(resolver.resolve(ADDRESS).await, Identity::unresolved(ADDRESS));
    }

    #[tokio::test]
    async fn test_resolve_falls_back_on_error_status() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", format!("/address/{ADDRESS}").as_str())
            .with_status(500)
            .with_body(r#"{"name":"should-not-be-used.eth"}"#)
            .create_async()
            .await;

        let resolver =
            EnsResolver::new_with_endpoint(Client::new(), format!("{}/address", server.url()));

        assert_eq!(resolver.resolve(ADDRESS).await, Identity::unresolved(ADDRESS));
    }

    #[tokio::test]
    async fn test_resolve_falls_back_on_invalid_json() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", format!("/address/{ADDRESS}").as_str())
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let resolver =
            EnsResolver::new_with_endpoint(Client::new(), format!("{}/address", server.url()));

        assert_eq!(resolver.resolve(ADDRESS).await, Identity::unresolved(ADDRESS));
    }

    #[tokio::test]
    async fn test_resolve_falls_back_on_network_error() {
        let resolver =
            EnsResolver::new_with_endpoint(Client::new(), "http://127.0.0.1:1/address".to_string());

        let identity = resolver.resolve(ADDRESS).await;
        assert_eq!(identity.display_name(), ADDRESS);
        assert_eq!(identity.social_handle(), None);
    }

    #[tokio::test]
    async fn test_resolve_falls_back_on_timeout() {
        // accepts connections at the TCP level but never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .unwrap();
        let resolver = EnsResolver::new_with_endpoint(client, format!("http://{addr}/address"));

        assert_eq!(resolver.resolve(ADDRESS).await, Identity::unresolved(ADDRESS));
        drop(listener);
    }
}
