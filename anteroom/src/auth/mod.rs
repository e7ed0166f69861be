//! Session and role plumbing: cookie extraction, role resolution, the
//! route admission policy, the request-time guard middleware, and the
//! session change listener.

pub mod current_user;
pub mod listener;
pub mod middleware;
pub mod policy;
pub mod resolver;

pub use current_user::CurrentUser;
pub use listener::SessionChangeListener;
pub use policy::{AdmissionDecision, RoutePolicy};
pub use resolver::{Role, RoleResolution};
