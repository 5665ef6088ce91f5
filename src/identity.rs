//! Session identity.
//!
//! Two questions are answered here before the live connection is used: which
//! conversation the view is bound to ([`Route`]), and whether a credential is
//! available at all ([`IdentityResolver`]).  The protocol client never opens
//! its transport without a credential and re-derives its connection URL
//! whenever the credential published by the resolver changes.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

use crate::client::ChatApi;
use crate::error::{Error, Result};
use crate::types::{AuthSession, AuthUser, ConversationRef};

/// Path prefix of a conversation-bound view.
const CHATS_PREFIX: &str = "/chats/";

/// The view a chat session is mounted on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum Route {
    /// The identifier-less view: the next message starts a new conversation.
    #[default]
    Home,
    /// A view bound to an existing conversation.
    Chat(ConversationRef),
}

impl Route {
    /// Parse `/` or `/chats/{id}`.
    pub fn parse(path: &str) -> Result<Self> {
        let path = path.trim();
        if path.is_empty() || path == "/" {
            return Ok(Route::Home);
        }
        match path.strip_prefix(CHATS_PREFIX) {
            Some(id) if !id.is_empty() && !id.contains('/') => Ok(Route::Chat(id.into())),
            _ => Err(Error::validation(
                format!("unrecognized route '{path}'"),
                Some("route".to_string()),
            )),
        }
    }

    /// The conversation this route is bound to.
    pub fn conversation(&self) -> Option<&ConversationRef> {
        match self {
            Route::Home => None,
            Route::Chat(id) => Some(id),
        }
    }

    /// The path form of this route.
    pub fn path(&self) -> String {
        match self {
            Route::Home => "/".to_string(),
            Route::Chat(id) => format!("{CHATS_PREFIX}{id}"),
        }
    }
}

impl From<Option<ConversationRef>> for Route {
    fn from(id: Option<ConversationRef>) -> Self {
        match id {
            Some(id) => Route::Chat(id),
            None => Route::Home,
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// A bearer credential plus the account it was issued to, when known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// Bearer token.
    pub token: String,
    /// The account, when the credential came from a sign-in.
    pub user: Option<AuthUser>,
}

impl Credential {
    /// A credential supplied from outside, e.g. on the command line.
    pub fn preset(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            user: None,
        }
    }
}

impl From<AuthSession> for Credential {
    fn from(session: AuthSession) -> Self {
        Self {
            token: session.auth_token,
            user: Some(session.user),
        }
    }
}

/// Issues and revokes credentials.
#[async_trait::async_trait]
pub trait CredentialIssuer: Send + Sync {
    /// Obtain a fresh anonymous credential.
    async fn sign_in_anonymously(&self) -> Result<AuthSession>;
    /// Invalidate `token`.
    async fn logout(&self, token: &str) -> Result<()>;
}

#[async_trait::async_trait]
impl CredentialIssuer for ChatApi {
    async fn sign_in_anonymously(&self) -> Result<AuthSession> {
        ChatApi::sign_in_anonymously(self).await
    }

    async fn logout(&self, token: &str) -> Result<()> {
        ChatApi::logout(self, token).await
    }
}

/// Obtains, reuses, and publishes the session credential.
pub struct IdentityResolver {
    issuer: Arc<dyn CredentialIssuer>,
    credential: watch::Sender<Option<Credential>>,
}

impl IdentityResolver {
    /// Create a resolver, optionally seeded with an existing credential.
    pub fn new(issuer: Arc<dyn CredentialIssuer>, preset: Option<Credential>) -> Self {
        let (credential, _) = watch::channel(preset);
        Self { issuer, credential }
    }

    /// The current credential.
    pub fn credential(&self) -> Option<Credential> {
        self.credential.borrow().clone()
    }

    /// The current bearer token.
    pub fn token(&self) -> Option<String> {
        self.credential.borrow().as_ref().map(|c| c.token.clone())
    }

    /// Observe credential changes.  `None` means the connection must not be open.
    pub fn subscribe(&self) -> watch::Receiver<Option<Credential>> {
        self.credential.subscribe()
    }

    /// Replace the credential with one issued elsewhere.
    pub fn set_credential(&self, credential: Option<Credential>) {
        self.credential.send_if_modified(|current| {
            if *current == credential {
                false
            } else {
                *current = credential;
                true
            }
        });
    }

    /// Return the current credential, signing in anonymously when there is none.
    pub async fn ensure(&self) -> Result<Credential> {
        if let Some(credential) = self.credential() {
            return Ok(credential);
        }
        let credential = Credential::from(self.issuer.sign_in_anonymously().await?);
        tracing::info!(
            user = credential.user.as_ref().map(|u| u.id.as_str()),
            "signed in anonymously"
        );
        self.set_credential(Some(credential.clone()));
        Ok(credential)
    }

    /// Drop the credential and revoke it with the service.
    ///
    /// The credential is withdrawn before the service is contacted, so the
    /// protocol client disconnects even when revocation fails.
    pub async fn logout(&self) -> Result<()> {
        let Some(credential) = self.credential.send_replace(None) else {
            return Err(Error::authentication("not signed in"));
        };
        self.issuer.logout(&credential.token).await
    }
}

impl fmt::Debug for IdentityResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityResolver")
            .field("signed_in", &self.credential.borrow().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeIssuer {
        sign_ins: AtomicUsize,
        logouts: AtomicUsize,
        fail_logout: bool,
    }

    #[async_trait::async_trait]
    impl CredentialIssuer for FakeIssuer {
        async fn sign_in_anonymously(&self) -> Result<AuthSession> {
            let n = self.sign_ins.fetch_add(1, Ordering::SeqCst);
            Ok(AuthSession {
                user: AuthUser {
                    id: format!("u{n}"),
                    email: None,
                    is_anonymous: true,
                },
                auth_token: format!("tok{n}"),
            })
        }

        async fn logout(&self, _token: &str) -> Result<()> {
            self.logouts.fetch_add(1, Ordering::SeqCst);
            if self.fail_logout {
                Err(Error::server(503, "unavailable"))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn route_parsing() {
        assert_eq!(Route::parse("/").unwrap(), Route::Home);
        assert_eq!(Route::parse("").unwrap(), Route::Home);
        assert_eq!(Route::parse("/chats/c1").unwrap(), Route::Chat("c1".into()));
        assert!(Route::parse("/chats/").unwrap_err().is_validation());
        assert!(Route::parse("/settings").unwrap_err().is_validation());
        assert!(Route::parse("/chats/a/b").is_err());
    }

    #[test]
    fn route_path_and_conversation() {
        let route = Route::Chat("c1".into());
        assert_eq!(route.path(), "/chats/c1");
        assert_eq!(route.to_string(), "/chats/c1");
        assert_eq!(route.conversation(), Some(&ConversationRef::from("c1")));
        assert_eq!(Route::Home.conversation(), None);
        assert_eq!(Route::from(None), Route::Home);
    }

    #[tokio::test]
    async fn ensure_reuses_preset_credential() {
        let issuer = Arc::new(FakeIssuer::default());
        let resolver = IdentityResolver::new(issuer.clone(), Some(Credential::preset("given")));
        assert_eq!(resolver.ensure().await.unwrap().token, "given");
        assert_eq!(issuer.sign_ins.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn ensure_signs_in_once() {
        let issuer = Arc::new(FakeIssuer::default());
        let resolver = IdentityResolver::new(issuer.clone(), None);
        let mut rx = resolver.subscribe();
        let first = resolver.ensure().await.unwrap();
        let second = resolver.ensure().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.token, "tok0");
        assert_eq!(issuer.sign_ins.load(Ordering::SeqCst), 1);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().as_ref().unwrap().token, "tok0");
    }

    #[tokio::test]
    async fn logout_withdraws_credential_even_on_failure() {
        let issuer = Arc::new(FakeIssuer {
            fail_logout: true,
            ..FakeIssuer::default()
        });
        let resolver = IdentityResolver::new(issuer.clone(), Some(Credential::preset("t")));
        let err = resolver.logout().await.unwrap_err();
        assert_eq!(err.status_code(), Some(503));
        assert!(resolver.credential().is_none());
        assert_eq!(issuer.logouts.load(Ordering::SeqCst), 1);
        assert!(resolver.logout().await.unwrap_err().is_authentication());
    }

    #[test]
    fn set_credential_only_publishes_changes() {
        let resolver = IdentityResolver::new(Arc::new(FakeIssuer::default()), None);
        let mut rx = resolver.subscribe();
        resolver.set_credential(None);
        assert!(!rx.has_changed().unwrap());
        resolver.set_credential(Some(Credential::preset("t")));
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();
        assert_eq!(resolver.token().as_deref(), Some("t"));
    }
}
