//! The endpoint table.
//!
//! Every endpoint is declared exactly once here. The same table builds the
//! axum router and the [`RouteRegistry`] that route assignments are
//! validated against, so a role can only be granted endpoints that exist.

use axum::routing::{get, patch, post, MethodRouter};

use warden_auth::{Action, RouteRegistry, RouteSpec};

pub mod common;
pub mod menus;
pub mod roles;
pub mod system;
pub mod users;

/// What a request must carry before the handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    Public,
    /// Valid bearer token.
    Authenticated,
    /// Valid bearer token and a policy granting the active role access.
    Policy,
}

pub struct Endpoint {
    pub route: RouteSpec,
    pub guard: Guard,
    pub handler: MethodRouter,
}

impl Endpoint {
    fn new(guard: Guard, route: RouteSpec, handler: MethodRouter) -> Self {
        Self {
            route,
            guard,
            handler,
        }
    }
}

pub fn endpoints() -> Vec<Endpoint> {
    use Guard::*;

    vec![
        Endpoint::new(
            Public,
            RouteSpec::new(Action::GET, "/health", "health").tag("System"),
            get(system::health),
        ),
        Endpoint::new(
            Authenticated,
            RouteSpec::new(Action::GET, "/me", "me")
                .summary("current user with menu tree and button permissions")
                .tag("Auth"),
            get(system::me),
        ),
        Endpoint::new(
            Authenticated,
            RouteSpec::new(Action::GET, "/routes", "list_routes")
                .summary("assignable endpoints")
                .tag("System"),
            get(system::list_routes),
        ),
        // ── User ────────────────────────────────────────────────────────────
        Endpoint::new(
            Policy,
            RouteSpec::new(Action::GET, "/User/{id}", "query_user").tag("User"),
            get(users::get_user),
        ),
        Endpoint::new(
            Policy,
            RouteSpec::new(Action::PATCH, "/User/{id}", "update_user").tag("User"),
            patch(users::update_user),
        ),
        Endpoint::new(
            Policy,
            RouteSpec::new(Action::POST, "/User/assign/role", "assign_roles")
                .summary("replace the roles of a user")
                .tag("User"),
            post(users::assign_roles),
        ),
        Endpoint::new(
            Policy,
            RouteSpec::new(Action::POST, "/User/activate/role", "activate_role")
                .summary("switch the active role of a user")
                .tag("User"),
            post(users::activate_role),
        ),
        // ── Role ────────────────────────────────────────────────────────────
        Endpoint::new(
            Policy,
            RouteSpec::new(Action::GET, "/Role/{id}/routes", "role_routes")
                .summary("route policies of a role")
                .tag("Role"),
            get(roles::role_routes),
        ),
        Endpoint::new(
            Policy,
            RouteSpec::new(Action::PATCH, "/Role/{id}", "update_role").tag("Role"),
            patch(roles::update_role),
        ),
        Endpoint::new(
            Policy,
            RouteSpec::new(Action::POST, "/Role/assign/menu", "assign_menus")
                .summary("replace the menus of a role")
                .tag("Role"),
            post(roles::assign_menus),
        ),
        Endpoint::new(
            Policy,
            RouteSpec::new(Action::POST, "/Role/assign/route", "assign_routes")
                .summary("replace the route policies of a role")
                .tag("Role"),
            post(roles::assign_routes),
        ),
        Endpoint::new(
            Policy,
            RouteSpec::new(Action::GET, "/Role/explain", "explain")
                .summary("explain an authorization decision")
                .tag("Role"),
            get(roles::explain),
        ),
        // ── Menu ────────────────────────────────────────────────────────────
        Endpoint::new(
            Policy,
            RouteSpec::new(Action::GET, "/Menu", "menu_tree").tag("Menu"),
            get(menus::menu_tree),
        ),
        Endpoint::new(
            Policy,
            RouteSpec::new(Action::PATCH, "/Menu/{id}", "update_menu").tag("Menu"),
            patch(menus::update_menu),
        ),
    ]
}

/// Registry of the policy-guarded endpoints; only these can be granted.
pub fn registry() -> RouteRegistry {
    RouteRegistry::new(
        endpoints()
            .into_iter()
            .filter(|endpoint| endpoint.guard == Guard::Policy)
            .map(|endpoint| endpoint.route),
    )
}

/// `{param}` templates in the axum 0.7 `:param` syntax.
pub fn axum_path(template: &str) -> String {
    template.replace('{', ":").replace('}', "")
}
