use warden_auth::{Principal, User};

/// Principal context for a request: the authenticated account as loaded
/// from the directory when the request arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    user: User,
}

impl PrincipalContext {
    pub fn new(user: User) -> Self {
        Self { user }
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn principal(&self) -> Principal {
        self.user.principal()
    }
}
