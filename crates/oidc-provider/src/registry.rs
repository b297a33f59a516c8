//! Read-only client registry.

use std::collections::HashMap;
use std::sync::Arc;

use crate::types::{Client, ClientValidationError};

/// Registered clients, keyed by `client_id`.
///
/// Built once from configuration. Lookups hand out shared references; there
/// is no way to add, change or remove a client afterwards.
#[derive(Debug, Clone, Default)]
pub struct ClientRegistry {
    clients: Arc<HashMap<String, Arc<Client>>>,
}

impl ClientRegistry {
    /// Validates and registers the given clients.
    ///
    /// # Errors
    ///
    /// Returns the first invalid registration, or `DuplicateClientId` if two
    /// clients share an id.
    pub fn new(clients: impl IntoIterator<Item = Client>) -> Result<Self, ClientValidationError> {
        let mut map = HashMap::new();
        for client in clients {
            client.validate()?;
            if map.contains_key(&client.client_id) {
                return Err(ClientValidationError::DuplicateClientId(client.client_id));
            }
            map.insert(client.client_id.clone(), Arc::new(client));
        }
        Ok(Self {
            clients: Arc::new(map),
        })
    }

    /// Looks up a client.
    #[must_use]
    pub fn get(&self, client_id: &str) -> Option<Arc<Client>> {
        self.clients.get(client_id).cloned()
    }

    /// Number of registered clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns `true` if no clients are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Iterates over the registered client ids.
    pub fn client_ids(&self) -> impl Iterator<Item = &str> {
        self.clients.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClientType, GrantType, TokenEndpointAuthMethod};

    fn client(id: &str) -> Client {
        Client {
            client_id: id.to_string(),
            name: id.to_string(),
            client_type: ClientType::Public,
            client_secret: None,
            redirect_uris: vec!["http://localhost/cb".to_string()],
            auth_methods: vec![TokenEndpointAuthMethod::None],
            grant_types: vec![GrantType::AuthorizationCode],
            scopes: vec![],
            jwks: None,
            access_token_lifetime: None,
        }
    }

    #[test]
    fn test_lookup() {
        let registry = ClientRegistry::new([client("a"), client("b")]).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("a").unwrap().client_id, "a");
        assert!(registry.get("c").is_none());
    }

    #[test]
    fn test_duplicate_rejected() {
        let err = ClientRegistry::new([client("a"), client("a")]).unwrap_err();
        assert_eq!(err, ClientValidationError::DuplicateClientId("a".to_string()));
    }

    #[test]
    fn test_invalid_rejected() {
        let mut bad = client("a");
        bad.redirect_uris.clear();
        assert!(ClientRegistry::new([bad]).is_err());
    }
}
