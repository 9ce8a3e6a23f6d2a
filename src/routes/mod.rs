/// Router Module Index
///
/// Splits the API by who may reach it. The split is a first gate only: every handler
/// behind the authentication layer still asks the authorization rules itself.

/// Anonymous access: catalog, reviews and comments reads, and the auth endpoints.
pub mod public;

/// Any authenticated user: own profile, review and comment writes.
pub mod authenticated;

/// Admin-only surfaces: the users collection and catalog writes.
pub mod admin;
