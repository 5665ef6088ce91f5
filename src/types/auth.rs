use serde::{Deserialize, Serialize};

/// The account a credential belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    /// Account identifier.
    pub id: String,

    /// Email address for authenticated accounts.
    #[serde(default)]
    pub email: Option<String>,

    /// True for accounts created by anonymous sign-in.
    #[serde(default)]
    pub is_anonymous: bool,
}

/// Response of `POST /api/auth/anonymous`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    /// The signed-in account.
    pub user: AuthUser,

    /// Bearer token for HTTP calls and the live connection.
    pub auth_token: String,
}
