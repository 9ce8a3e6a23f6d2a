use uuid::Uuid;

use crate::{auth::AuthUser, error::AppError};

/// Action
///
/// What a request wants to do with a resource. `Read` covers list and retrieve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Create,
    Update,
    Delete,
}

/// Resource
///
/// The target of an action, carrying the ownership facts the rules need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Category,
    Genre,
    Title,
    Review { author_id: Uuid },
    Comment { author_id: Uuid },
    /// A user's own record, reached through `/users/me`.
    Profile { owner_id: Uuid },
    /// The users collection (`/users`, `/users/{username}`).
    UserRecord,
}

/// may
///
/// The authorization rules, evaluated fresh for every request. `identity` is `None`
/// for anonymous callers, who may read the catalog, reviews and comments but never
/// write anything.
pub fn may(identity: Option<&AuthUser>, action: Action, resource: Resource) -> bool {
    match (action, resource) {
        (
            Action::Read,
            Resource::Category
            | Resource::Genre
            | Resource::Title
            | Resource::Review { .. }
            | Resource::Comment { .. },
        ) => true,

        (_, Resource::Category | Resource::Genre | Resource::Title | Resource::UserRecord) => {
            identity.is_some_and(|who| who.role.is_admin())
        }

        (_, Resource::Review { author_id } | Resource::Comment { author_id }) => {
            identity.is_some_and(|who| who.id == author_id || who.role.can_moderate())
        }

        // The owner reads and edits their record; deleting it goes through the users collection.
        (Action::Read | Action::Update, Resource::Profile { owner_id }) => {
            identity.is_some_and(|who| who.id == owner_id || who.role.is_admin())
        }
        (Action::Create | Action::Delete, Resource::Profile { .. }) => {
            identity.is_some_and(|who| who.role.is_admin())
        }
    }
}

/// may_assign_role
///
/// Only admins may change the `role` field of any user record, their own included.
/// For everyone else the field is read-only: callers drop it instead of rejecting.
pub fn may_assign_role(identity: &AuthUser) -> bool {
    identity.role.is_admin()
}

/// ensure
///
/// `may` for handlers: a denied check becomes `AppError::Forbidden` (anonymous callers
/// never reach the write handlers, the auth layer rejects them first).
pub fn ensure(identity: &AuthUser, action: Action, resource: Resource) -> Result<(), AppError> {
    if may(Some(identity), action, resource) {
        Ok(())
    } else {
        tracing::info!(
            user = %identity.username,
            role = %identity.role,
            ?action,
            ?resource,
            "permission denied"
        );
        Err(AppError::Forbidden)
    }
}
