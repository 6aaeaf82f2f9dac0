use crate::core::{Caller, Result, TxnError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

/// Lowest bcrypt cost accepted; cheap hashes for tests and local runs
pub const MIN_HASH_COST: u32 = 4;

const MIN_CREDENTIAL_LEN: usize = 8;

/// Level of access a call asks the gate for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    /// Act on sessions owned by the calling identity
    Owner,
    /// Act on sessions owned by anyone (administrative kill)
    Operator,
}

/// Authorization gate every session call passes through
///
/// Implementations must fail closed: anything other than an explicit
/// success is an `AuthorizationFailure`.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn check(&self, caller: &Caller, access: Access) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    /// Open and drive own transactions
    Transact,
    /// Everything `Transact` allows, plus killing other identities' sessions
    Admin,
}

impl Permission {
    fn required_for(access: Access) -> Self {
        match access {
            Access::Owner => Permission::Transact,
            Access::Operator => Permission::Admin,
        }
    }
}

/// An identity known to the gate
#[derive(Debug, Clone)]
pub struct User {
    identity: String,
    credential_hash: String,
    permissions: Vec<Permission>,
}

impl User {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn permissions(&self) -> &[Permission] {
        &self.permissions
    }

    /// Admin implies every other permission
    pub fn grants(&self, permission: Permission) -> bool {
        self.permissions
            .iter()
            .any(|held| *held == Permission::Admin || *held == permission)
    }
}

/// Credential registry backing the authorization gate
///
/// Holds bcrypt-hashed accounts and the set of store names callers may open
/// transactions against. Constructed explicitly and shared by `Arc`.
pub struct AuthManager {
    users: RwLock<HashMap<String, User>>,
    stores: RwLock<HashSet<String>>,
    hash_cost: u32,
}

impl AuthManager {
    /// Registry seeded with one admin account, hashed at `bcrypt::DEFAULT_COST`
    pub fn with_admin(identity: &str, credential: &str) -> Self {
        Self::with_admin_and_cost(identity, credential, bcrypt::DEFAULT_COST)
    }

    /// Registry seeded with one admin account, hashing every credential at `hash_cost`
    pub fn with_admin_and_cost(identity: &str, credential: &str, hash_cost: u32) -> Self {
        let hash_cost = hash_cost.max(MIN_HASH_COST);
        let admin = User {
            identity: identity.to_string(),
            credential_hash: hash_credential(credential, hash_cost),
            permissions: vec![Permission::Admin],
        };

        Self {
            users: RwLock::new(HashMap::from([(identity.to_string(), admin)])),
            stores: RwLock::new(HashSet::new()),
            hash_cost,
        }
    }

    /// Makes a store name available to callers
    pub async fn register_store(&self, store: &str) {
        self.stores.write().await.insert(store.to_string());
    }

    pub async fn has_store(&self, store: &str) -> bool {
        self.stores.read().await.contains(store)
    }

    /// Verify an identity/credential pair
    ///
    /// Unknown identities and wrong credentials produce the same error.
    pub async fn authenticate(&self, identity: &str, credential: &str) -> Result<User> {
        let users = self.users.read().await;
        match users.get(identity) {
            Some(user) if bcrypt::verify(credential, &user.credential_hash).unwrap_or(false) => {
                Ok(user.clone())
            }
            _ => Err(TxnError::AuthorizationFailure(
                "Invalid identity or credential".into(),
            )),
        }
    }

    pub async fn create_user(
        &self,
        identity: &str,
        credential: &str,
        permissions: Vec<Permission>,
    ) -> Result<()> {
        if identity.is_empty() {
            return Err(TxnError::ConfigError("Identity cannot be empty".into()));
        }
        if credential.len() < MIN_CREDENTIAL_LEN {
            return Err(TxnError::ConfigError(format!(
                "Credential must be at least {} characters long",
                MIN_CREDENTIAL_LEN
            )));
        }

        let mut users = self.users.write().await;
        if users.contains_key(identity) {
            return Err(TxnError::ConfigError(format!(
                "Identity '{}' already exists",
                identity
            )));
        }

        users.insert(
            identity.to_string(),
            User {
                identity: identity.to_string(),
                credential_hash: hash_credential(credential, self.hash_cost),
                permissions,
            },
        );
        Ok(())
    }
}

fn hash_credential(credential: &str, cost: u32) -> String {
    // An empty hash never verifies, so a failed hash leaves the account locked
    bcrypt::hash(credential, cost).unwrap_or_default()
}

#[async_trait]
impl Authorizer for AuthManager {
    async fn check(&self, caller: &Caller, access: Access) -> Result<()> {
        if !self.has_store(&caller.store).await {
            return Err(TxnError::AuthorizationFailure(format!(
                "Unknown store '{}'",
                caller.store
            )));
        }

        let user = self.authenticate(&caller.identity, &caller.credential).await?;
        let required = Permission::required_for(access);
        if !user.grants(required) {
            return Err(TxnError::AuthorizationFailure(format!(
                "'{}' lacks {:?} permission",
                user.identity(),
                required
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn gate() -> AuthManager {
        let auth = AuthManager::with_admin_and_cost("admin", "adminpass", MIN_HASH_COST);
        auth.register_store("demo").await;
        auth.create_user("alice", "password123", vec![Permission::Transact])
            .await
            .unwrap();
        auth
    }

    #[tokio::test]
    async fn test_owner_access_granted() {
        let auth = gate().await;
        let caller = Caller::new("demo", "alice", "password123");
        assert!(auth.check(&caller, Access::Owner).await.is_ok());
    }

    #[tokio::test]
    async fn test_operator_access_requires_admin() {
        let auth = gate().await;

        let alice = Caller::new("demo", "alice", "password123");
        let result = auth.check(&alice, Access::Operator).await;
        assert!(matches!(result, Err(TxnError::AuthorizationFailure(_))));

        let admin = Caller::new("demo", "admin", "adminpass");
        assert!(auth.check(&admin, Access::Operator).await.is_ok());
        assert!(auth.check(&admin, Access::Owner).await.is_ok());
    }

    #[tokio::test]
    async fn test_bad_credentials_fail_closed() {
        let auth = gate().await;

        let wrong = Caller::new("demo", "alice", "wrongpassword");
        assert!(matches!(
            auth.check(&wrong, Access::Owner).await,
            Err(TxnError::AuthorizationFailure(_))
        ));

        let ghost = Caller::new("demo", "ghost", "password123");
        assert!(auth.check(&ghost, Access::Owner).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_store_rejected() {
        let auth = gate().await;
        let caller = Caller::new("other", "alice", "password123");
        assert!(matches!(
            auth.check(&caller, Access::Owner).await,
            Err(TxnError::AuthorizationFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_identity_without_permissions() {
        let auth = gate().await;
        auth.create_user("viewer", "password123", vec![]).await.unwrap();
        let caller = Caller::new("demo", "viewer", "password123");
        assert!(auth.check(&caller, Access::Owner).await.is_err());
    }

    #[tokio::test]
    async fn test_create_user_validation() {
        let auth = gate().await;

        let duplicate = auth.create_user("alice", "password1234", vec![]).await;
        assert!(matches!(duplicate, Err(TxnError::ConfigError(_))));

        let short = auth.create_user("carol", "short", vec![]).await;
        assert!(short.unwrap_err().to_string().contains("at least 8 characters"));

        let anonymous = auth.create_user("", "password123", vec![]).await;
        assert!(anonymous.is_err());
    }
}
