//! Authorization request processing and code issuance.
//!
//! [`AuthorizationService::authorize`] validates a request and stores it as
//! `pending`. The login UI then calls
//! [`AuthorizationService::complete_authorization`] (or
//! [`AuthorizationService::deny_authorization`]) with the request id, which
//! produces the redirect back to the client. No state is kept in the service
//! between these calls.

use std::sync::Arc;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::AuthResult;
use crate::config::ProviderConfig;
use crate::error::AuthError;
use crate::oauth::authorize::{
    AuthorizationError, AuthorizationErrorCode, AuthorizationParams, AuthorizationResponse,
    AuthorizeError, PendingAuthorization,
};
use crate::oauth::pkce::{PkceChallenge, PkceChallengeMethod};
use crate::oauth::request_object::RequestObjectVerifier;
use crate::registry::ClientRegistry;
use crate::storage::{Storage, TransitionOutcome};
use crate::types::{
    AuthRequestStatus, AuthorizationCode, AuthorizationRequest, Client, GrantType, expires_after,
    generate_token, hash_token,
};

/// Authorization endpoint service.
pub struct AuthorizationService {
    config: Arc<ProviderConfig>,
    registry: ClientRegistry,
    storage: Arc<dyn Storage>,
    request_objects: RequestObjectVerifier,
}

impl AuthorizationService {
    /// Creates a new authorization service.
    #[must_use]
    pub fn new(
        config: Arc<ProviderConfig>,
        registry: ClientRegistry,
        storage: Arc<dyn Storage>,
    ) -> Self {
        let request_objects = RequestObjectVerifier::new(config.issuer.clone());
        Self {
            config,
            registry,
            storage,
            request_objects,
        }
    }

    /// Validates an authorization request and stores it as `pending`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorizeError::Inline`] while the redirect URI is not yet
    /// known to be registered:
    /// - missing or unknown `client_id`
    /// - missing or unregistered `redirect_uri`
    ///
    /// and [`AuthorizeError::Redirect`] for everything after:
    /// - `response_type` is not `code` (`unsupported_response_type`)
    /// - client may not use the code grant (`unauthorized_client`)
    /// - missing or disallowed scopes (`invalid_request`, `invalid_scope`)
    /// - PKCE missing when required, bad method or challenge (`invalid_request`)
    /// - storage failure (`server_error`)
    ///
    /// Request object failures redirect only if the query's own
    /// `redirect_uri` is registered.
    pub async fn authorize(
        &self,
        mut params: AuthorizationParams,
    ) -> Result<PendingAuthorization, AuthorizeError> {
        // 1. Identify the client
        let client_id = params
            .client_id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                AuthorizeError::Inline(AuthError::invalid_request(
                    "Missing required parameter: client_id",
                ))
            })?;
        let client = self.registry.get(&client_id).ok_or_else(|| {
            tracing::warn!(client_id = %client_id, "Authorization request for unknown client");
            AuthorizeError::Inline(AuthError::invalid_client("Unknown client"))
        })?;

        // 2. Request objects. The query redirect_uri is the only place an
        //    error can go until the object is verified.
        let query_redirect = params
            .redirect_uri
            .clone()
            .filter(|uri| client.is_redirect_uri_allowed(uri));
        let early_failure = |error: AuthError, state: Option<String>| match query_redirect {
            Some(ref redirect_uri) => AuthorizeError::Redirect {
                redirect_uri: redirect_uri.clone(),
                error,
                state,
            },
            None => AuthorizeError::Inline(error),
        };

        if params.request_uri.is_some() {
            return Err(early_failure(
                AuthError::RequestUriNotSupported,
                params.state.clone(),
            ));
        }
        if let Some(request_object) = params.request.take() {
            if !self.config.oauth.request_object_supported {
                return Err(early_failure(
                    AuthError::RequestNotSupported,
                    params.state.clone(),
                ));
            }
            let state = params.state.clone();
            self.request_objects
                .merge(&request_object, &client, &mut params)
                .map_err(|e| early_failure(e, state))?;
        }

        // 3. Redirect URI must be registered (exact match)
        let redirect_uri = params.redirect_uri.clone().ok_or_else(|| {
            AuthorizeError::Inline(AuthError::invalid_request(
                "Missing required parameter: redirect_uri",
            ))
        })?;
        if !client.is_redirect_uri_allowed(&redirect_uri) {
            tracing::warn!(client_id = %client_id, "Unregistered redirect_uri");
            return Err(AuthorizeError::Inline(AuthError::invalid_request(
                "redirect_uri is not registered for this client",
            )));
        }

        // From here on the client is told through its redirect URI
        let state = params.state.clone();
        let redirect = |error: AuthError| {
            tracing::debug!(
                client_id = %client_id,
                error = %error.oauth_error_code(),
                "Authorization request rejected"
            );
            AuthorizeError::Redirect {
                redirect_uri: redirect_uri.clone(),
                error,
                state: state.clone(),
            }
        };

        let request = self
            .validate(&client, &params, &redirect_uri)
            .map_err(&redirect)?;

        // 4. Persist as pending
        self.storage
            .create_auth_request(&request)
            .await
            .map_err(|e| {
                tracing::error!(client_id = %client_id, error = %e, "Failed to store authorization request");
                redirect(e)
            })?;

        let login_redirect = self.login_redirect(request.id).map_err(&redirect)?;

        tracing::info!(
            client_id = %client_id,
            auth_request_id = %request.id,
            scope = %request.scope_string(),
            "Authorization request accepted"
        );

        Ok(PendingAuthorization {
            request_id: request.id,
            login_redirect,
        })
    }

    /// Checks everything after the redirect URI and builds the pending request.
    fn validate(
        &self,
        client: &Client,
        params: &AuthorizationParams,
        redirect_uri: &str,
    ) -> AuthResult<AuthorizationRequest> {
        // response_type
        let response_type = params
            .response_type
            .as_deref()
            .ok_or_else(|| AuthError::invalid_request("Missing required parameter: response_type"))?;
        if response_type != "code" {
            return Err(AuthError::unsupported_response_type(response_type));
        }

        // grant type
        if !client.is_grant_type_allowed(GrantType::AuthorizationCode) {
            return Err(AuthError::unauthorized_client(
                "Client is not authorized for authorization_code grant",
            ));
        }

        // scopes
        let scopes = parse_scopes(params.scope.as_deref().unwrap_or_default());
        if scopes.is_empty() {
            return Err(AuthError::invalid_request("Missing required parameter: scope"));
        }
        if let Some(scope) = scopes
            .iter()
            .find(|s| !client.is_scope_allowed(s, &self.config.scopes_supported))
        {
            return Err(AuthError::invalid_scope(format!(
                "Scope '{}' is not allowed for this client",
                scope
            )));
        }

        // PKCE
        let code_challenge = self.validate_pkce(client, params)?;

        let now = OffsetDateTime::now_utc();
        Ok(AuthorizationRequest {
            id: Uuid::new_v4(),
            client_id: client.client_id.clone(),
            response_type: response_type.to_string(),
            scopes,
            redirect_uri: redirect_uri.to_string(),
            state: params.state.clone(),
            nonce: params.nonce.clone(),
            code_challenge,
            requested_at: now,
            expires_at: expires_after(now, self.config.oauth.authorization_request_lifetime)?,
            subject: None,
            authenticated_at: None,
            status: AuthRequestStatus::Pending,
        })
    }

    fn validate_pkce(
        &self,
        client: &Client,
        params: &AuthorizationParams,
    ) -> AuthResult<Option<PkceChallenge>> {
        let policy = &self.config.pkce;
        let required = if client.is_public() {
            policy.required_for_public_clients
        } else {
            policy.required_for_confidential_clients
        };

        let Some(ref challenge) = params.code_challenge else {
            if params.code_challenge_method.is_some() {
                return Err(AuthError::invalid_request(
                    "code_challenge_method without code_challenge",
                ));
            }
            if required {
                return Err(AuthError::invalid_request(
                    "PKCE code_challenge is required for this client",
                ));
            }
            if !client.is_public() {
                tracing::debug!(client_id = %client.client_id, "Confidential client is not using PKCE");
            }
            return Ok(None);
        };

        let method = PkceChallengeMethod::parse(
            params.code_challenge_method.as_deref(),
            policy.allow_plain,
        )
        .map_err(|e| AuthError::invalid_request(format!("Invalid PKCE challenge method: {}", e)))?;

        PkceChallenge::new(challenge.clone(), method)
            .map(Some)
            .map_err(|e| AuthError::invalid_request(format!("Invalid PKCE challenge: {}", e)))
    }

    fn login_redirect(&self, request_id: Uuid) -> AuthResult<String> {
        let mut url = url::Url::parse(&self.config.login_url())
            .map_err(|e| AuthError::configuration(format!("Invalid login URL: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("auth_request_id", &request_id.to_string());
        Ok(url.to_string())
    }

    /// Attaches the authenticated `subject` to a pending request and issues
    /// an authorization code.
    ///
    /// Returns the redirect URL back to the client carrying `code` and
    /// `state`. Called by the login UI after verifying the user's
    /// credentials.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` for an empty subject, or an unknown, expired or
    ///   already completed request
    /// - storage failures
    pub async fn complete_authorization(
        &self,
        request_id: Uuid,
        subject: &str,
    ) -> AuthResult<String> {
        if subject.is_empty() {
            return Err(AuthError::invalid_request("Subject cannot be empty"));
        }

        let now = OffsetDateTime::now_utc();
        let request = match self
            .storage
            .complete_auth_request(request_id, subject, now)
            .await?
        {
            TransitionOutcome::Applied(request) => request,
            // An earlier call authenticated the same subject but failed to
            // issue the code; resume from there.
            TransitionOutcome::WrongState(request)
                if request.status == AuthRequestStatus::Authenticated
                    && request.subject.as_deref() == Some(subject) =>
            {
                request
            }
            outcome => return Err(transition_error(request_id, outcome)),
        };

        let code = generate_token();
        let record = AuthorizationCode {
            code_hash: hash_token(&code),
            authorization_request_id: request.id,
            issued_at: now,
            expires_at: expires_after(now, self.config.oauth.authorization_code_lifetime)?,
            used: false,
        };

        match self.storage.issue_code(request.id, &record, now).await? {
            TransitionOutcome::Applied(_) => {}
            outcome => return Err(transition_error(request_id, outcome)),
        }

        tracing::info!(
            client_id = %request.client_id,
            auth_request_id = %request.id,
            "Authorization code issued"
        );

        AuthorizationResponse::new(code, request.state.clone())
            .to_redirect_url(&request.redirect_uri)
            .map_err(|e| AuthError::internal(format!("Invalid stored redirect_uri: {}", e)))
    }

    /// Ends a pending request the user declined.
    ///
    /// Returns the redirect URL back to the client carrying
    /// `error=access_denied`.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` for an unknown, expired or already completed request.
    pub async fn deny_authorization(&self, request_id: Uuid) -> AuthResult<String> {
        let now = OffsetDateTime::now_utc();
        let request = match self.storage.deny_auth_request(request_id, now).await? {
            TransitionOutcome::Applied(request) => request,
            outcome => return Err(transition_error(request_id, outcome)),
        };

        tracing::info!(
            client_id = %request.client_id,
            auth_request_id = %request.id,
            "Authorization request denied"
        );

        AuthorizationError::with_description(
            AuthorizationErrorCode::AccessDenied,
            "The resource owner denied the request",
            request.state.clone(),
        )
        .to_redirect_url(&request.redirect_uri)
        .map_err(|e| AuthError::internal(format!("Invalid stored redirect_uri: {}", e)))
    }

    /// Loads a request for display by the login UI.
    ///
    /// # Errors
    ///
    /// Storage failures.
    pub async fn find_request(&self, request_id: Uuid) -> AuthResult<Option<AuthorizationRequest>> {
        let now = OffsetDateTime::now_utc();
        Ok(self
            .storage
            .find_auth_request(request_id)
            .await?
            .filter(|r| r.status == AuthRequestStatus::Pending && !r.is_expired_at(now)))
    }
}

fn transition_error(request_id: Uuid, outcome: TransitionOutcome) -> AuthError {
    match outcome {
        TransitionOutcome::NotFound => {
            AuthError::invalid_request(format!("Unknown authorization request {}", request_id))
        }
        TransitionOutcome::Expired => AuthError::invalid_request("Authorization request expired"),
        TransitionOutcome::WrongState(request) => AuthError::invalid_request(format!(
            "Authorization request is already {}",
            request.status.as_str()
        )),
        TransitionOutcome::Applied(_) => AuthError::internal("Unexpected transition outcome"),
    }
}

/// Splits a scope string, dropping duplicates while keeping request order.
pub(crate) fn parse_scopes(scope: &str) -> Vec<String> {
    let mut scopes: Vec<String> = Vec::new();
    for s in scope.split_whitespace() {
        if !scopes.iter().any(|existing| existing == s) {
            scopes.push(s.to_string());
        }
    }
    scopes
}
