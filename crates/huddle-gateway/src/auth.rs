use std::sync::Arc;

use jsonwebtoken::{DecodingKey, Validation, decode};

use huddle_types::api::Claims;
use huddle_types::error::ChatError;
use huddle_types::events::HandshakeAuth;

/// Who a session or request acts as, once authenticated, with whatever
/// profile fields the credentials carried.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub image_url: Option<String>,
}

impl Identity {
    fn bare(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            ..Default::default()
        }
    }
}

/// Checks a session token with the identity provider.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Claims, ChatError>;
}

/// HS256 tokens signed with a secret shared with the identity provider.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<Claims, ChatError> {
        decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|_| ChatError::Unauthorized)
    }
}

/// Accepts or rejects credentials and binds the user id they carry.
///
/// Without a verifier the authenticator only enforces presence of a user
/// id (development mode); with one, the token must verify and its subject
/// must be the claimed user.
#[derive(Clone, Default)]
pub struct Authenticator {
    verifier: Option<Arc<dyn TokenVerifier>>,
}

impl Authenticator {
    pub fn new(verifier: Arc<dyn TokenVerifier>) -> Self {
        Self {
            verifier: Some(verifier),
        }
    }

    pub fn presence_only() -> Self {
        Self { verifier: None }
    }

    pub fn verifies_tokens(&self) -> bool {
        self.verifier.is_some()
    }

    /// Socket handshake: a user id is always required.
    pub fn authenticate(&self, auth: &HandshakeAuth) -> Result<Identity, ChatError> {
        let user_id = auth
            .user_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(ChatError::Unauthorized)?;

        let Some(verifier) = &self.verifier else {
            return Ok(Identity::bare(user_id));
        };

        let token = auth.token.as_deref().ok_or(ChatError::Unauthorized)?;
        let claims = verifier.verify(token)?;
        if claims.sub != user_id {
            return Err(ChatError::Unauthorized);
        }
        Ok(identity_from_claims(claims))
    }

    /// Bearer token of an HTTP request. In presence-only mode the token is
    /// taken to be the user id itself.
    pub fn authenticate_bearer(&self, token: &str) -> Result<Identity, ChatError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(ChatError::Unauthorized);
        }
        match &self.verifier {
            Some(verifier) => verifier.verify(token).map(identity_from_claims),
            None => Ok(Identity::bare(token)),
        }
    }
}

fn identity_from_claims(claims: Claims) -> Identity {
    Identity {
        user_id: claims.sub,
        email: claims.email,
        display_name: claims.name,
        first_name: claims.given_name,
        last_name: claims.family_name,
        image_url: claims.picture,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    const SECRET: &str = "test-secret";

    fn token_for(sub: &str) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp() as usize,
            email: Some(format!("{}@example.com", sub)),
            name: Some("Alice".into()),
            given_name: Some("Alice".into()),
            family_name: Some("Liddell".into()),
            picture: Some(format!("https://img.example.com/{}.png", sub)),
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
    }

    fn handshake(token: Option<String>, user_id: Option<&str>) -> HandshakeAuth {
        HandshakeAuth {
            token,
            user_id: user_id.map(str::to_string),
        }
    }

    #[test]
    fn missing_user_id_is_rejected() {
        let auth = Authenticator::presence_only();
        assert_eq!(auth.authenticate(&handshake(None, None)), Err(ChatError::Unauthorized));
        assert_eq!(auth.authenticate(&handshake(None, Some("  "))), Err(ChatError::Unauthorized));
    }

    #[test]
    fn presence_only_binds_claimed_id() {
        let auth = Authenticator::presence_only();
        let identity = auth.authenticate(&handshake(None, Some("alice"))).unwrap();
        assert_eq!(identity.user_id, "alice");
    }

    #[test]
    fn verified_token_must_match_claimed_user() {
        let auth = Authenticator::new(Arc::new(JwtVerifier::new(SECRET)));

        let identity = auth
            .authenticate(&handshake(Some(token_for("alice")), Some("alice")))
            .unwrap();
        assert_eq!(identity.email.as_deref(), Some("alice@example.com"));
        assert_eq!(identity.display_name.as_deref(), Some("Alice"));
        assert_eq!(identity.first_name.as_deref(), Some("Alice"));
        assert_eq!(identity.last_name.as_deref(), Some("Liddell"));
        assert_eq!(identity.image_url.as_deref(), Some("https://img.example.com/alice.png"));

        assert_eq!(
            auth.authenticate(&handshake(Some(token_for("mallory")), Some("alice"))),
            Err(ChatError::Unauthorized)
        );
        assert_eq!(
            auth.authenticate(&handshake(None, Some("alice"))),
            Err(ChatError::Unauthorized)
        );
        assert_eq!(
            auth.authenticate(&handshake(Some("garbage".into()), Some("alice"))),
            Err(ChatError::Unauthorized)
        );
    }

    #[test]
    fn bearer_tokens() {
        let auth = Authenticator::new(Arc::new(JwtVerifier::new(SECRET)));
        assert_eq!(auth.authenticate_bearer(&token_for("bob")).unwrap().user_id, "bob");
        assert!(auth.authenticate_bearer("").is_err());

        let dev = Authenticator::presence_only();
        assert_eq!(dev.authenticate_bearer("carol").unwrap().user_id, "carol");
    }
}
