//! Emoji → role bindings for each guild's role channel.

mod editor;
mod router;
mod store;

pub use editor::{AddRole, RoleEditor};
pub use router::{ReactionOutcome, ReactionRouter};
pub use store::{RoleChannel, RoleStore, ROLE_HEADER};
