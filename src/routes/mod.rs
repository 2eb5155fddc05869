/// Router Module Index
///
/// Splits the routing table by access level. Authentication is applied as a layer on the
/// `authenticated` and `admin` routers in `create_router`; permission and role checks
/// happen inside each handler.

/// Routes open to anonymous callers: health, session flows, read-only library data.
pub mod public;

/// Routes behind the `AuthUser` layer: the book catalog, role pages and `/me`.
pub mod authenticated;

/// Routes behind the `AuthUser` layer whose handlers also require the Admin role.
pub mod admin;
