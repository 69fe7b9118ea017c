//! Caller identity.
//!
//! The authentication handshake happens elsewhere; the ledger only consumes
//! the identity it yields. [`IdentityResolver`] maps a bearer credential to
//! a [`Caller`]. The bundled [`TokenResolver`] serves statically configured
//! tokens, which is what the binary and the tests use.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::model::AccountId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub account_id: AccountId,
    pub is_admin: bool,
}

impl Caller {
    pub fn user(account_id: impl Into<String>) -> Self {
        Self {
            account_id: AccountId::new(account_id),
            is_admin: false,
        }
    }

    pub fn admin(account_id: impl Into<String>) -> Self {
        Self {
            account_id: AccountId::new(account_id),
            is_admin: true,
        }
    }

    /// Whether this caller may act on a record owned by `owner`.
    pub fn may_access(&self, owner: &AccountId) -> bool {
        self.is_admin || &self.account_id == owner
    }
}

pub trait IdentityResolver: Send + Sync + 'static {
    /// Resolve a credential, `None` when it is unknown.
    fn resolve<'a>(
        &'a self,
        credential: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<Caller>> + Send + 'a>>;
}

/// A configured bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenGrant {
    pub token: String,
    pub account_id: String,
    #[serde(default)]
    pub admin: bool,
}

#[derive(Debug, Default)]
pub struct TokenResolver {
    tokens: HashMap<String, Caller>,
}

impl TokenResolver {
    pub fn from_grants<'a>(grants: impl IntoIterator<Item = &'a TokenGrant>) -> Self {
        let tokens = grants
            .into_iter()
            .filter(|g| !g.token.trim().is_empty())
            .map(|g| {
                let caller = Caller {
                    account_id: AccountId::new(g.account_id.clone()),
                    is_admin: g.admin,
                };
                (g.token.trim().to_string(), caller)
            })
            .collect();
        Self { tokens }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl IdentityResolver for TokenResolver {
    fn resolve<'a>(
        &'a self,
        credential: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<Caller>> + Send + 'a>> {
        let caller = self.tokens.get(credential.trim()).cloned();
        Box::pin(async move { caller })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_token_resolver() {
        let grants = vec![
            TokenGrant {
                token: "user-token".to_string(),
                account_id: "u1".to_string(),
                admin: false,
            },
            TokenGrant {
                token: "admin-token".to_string(),
                account_id: "ops".to_string(),
                admin: true,
            },
            TokenGrant {
                token: "  ".to_string(),
                account_id: "ghost".to_string(),
                admin: true,
            },
        ];
        let resolver = TokenResolver::from_grants(&grants);
        assert_eq!(resolver.len(), 2);

        assert_eq!(resolver.resolve("user-token").await, Some(Caller::user("u1")));
        assert_eq!(resolver.resolve("admin-token").await, Some(Caller::admin("ops")));
        assert_eq!(resolver.resolve("").await, None);
        assert_eq!(resolver.resolve("nope").await, None);
    }

    #[test]
    fn test_access_rules() {
        let owner = AccountId::from("u1");
        assert!(Caller::user("u1").may_access(&owner));
        assert!(!Caller::user("u2").may_access(&owner));
        assert!(Caller::admin("ops").may_access(&owner));
    }
}
