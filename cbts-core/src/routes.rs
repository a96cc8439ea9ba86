//! Client routes and the static role-to-route table
//!
//! Both the post-login redirect and the route guard read from the tables in
//! this module, so a role can never be sent to a dashboard the guard rejects.

use crate::types::Role;

/// Dashboard path for every enumerated role
const DASHBOARD_ROUTES: [(Role, &str); 6] = [
    (Role::ProductManager, "/dashboard/product-manager"),
    (Role::EngineeringManager, "/dashboard/engineering-manager"),
    (Role::TeamLead, "/dashboard/team-lead"),
    (Role::Developer, "/dashboard/developer"),
    (Role::Tester, "/dashboard/tester"),
    (Role::Customer, "/dashboard/customer"),
];

/// Roles the backend allows to report bugs
pub const BUG_REPORTERS: [Role; 4] = [
    Role::Tester,
    Role::Customer,
    Role::ProductManager,
    Role::EngineeringManager,
];

/// Navigation targets of the client
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Route {
    Landing,
    /// Login entry point; `return_to` holds the originally requested path
    Login { return_to: Option<String> },
    Register,
    ForgotPassword,
    Unauthorized,
    Dashboard(Role),
    Bugs,
    BugDetail(i64),
    CreateBug,
}

/// Who may render a route
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteAccess {
    Public,
    Authenticated,
    Roles(Vec<Role>),
}

impl RouteAccess {
    /// Whether an authenticated user holding `role` passes this rule
    pub fn permits(&self, role: Option<Role>) -> bool {
        match self {
            RouteAccess::Public | RouteAccess::Authenticated => true,
            RouteAccess::Roles(allowed) => role.is_some_and(|r| allowed.contains(&r)),
        }
    }
}

impl Route {
    pub fn login() -> Self {
        Route::Login { return_to: None }
    }

    pub fn login_returning_to(route: &Route) -> Self {
        Route::Login {
            return_to: Some(route.path()),
        }
    }

    /// Path without query string
    pub fn path(&self) -> String {
        match self {
            Route::Landing => "/".to_string(),
            Route::Login { .. } => "/login".to_string(),
            Route::Register => "/register".to_string(),
            Route::ForgotPassword => "/forgot-password".to_string(),
            Route::Unauthorized => "/unauthorized".to_string(),
            Route::Dashboard(role) => dashboard_path(*role).to_string(),
            Route::Bugs => "/app/bugs".to_string(),
            Route::BugDetail(id) => format!("/app/bugs/{}", id),
            Route::CreateBug => "/app/bugs/new".to_string(),
        }
    }

    pub fn access(&self) -> RouteAccess {
        match self {
            Route::Landing
            | Route::Login { .. }
            | Route::Register
            | Route::ForgotPassword
            | Route::Unauthorized => RouteAccess::Public,
            Route::Bugs | Route::BugDetail(_) => RouteAccess::Authenticated,
            Route::CreateBug => RouteAccess::Roles(BUG_REPORTERS.to_vec()),
            Route::Dashboard(role) => RouteAccess::Roles(vec![*role]),
        }
    }

    /// Parse a path (optionally with a `?next=` query on `/login`)
    pub fn parse(input: &str) -> Option<Route> {
        let (path, query) = match input.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (input, None),
        };
        let path = match path.trim_end_matches('/') {
            "" => "/",
            trimmed => trimmed,
        };

        let route = match path {
            "/" => Route::Landing,
            "/login" => Route::Login {
                return_to: query.and_then(parse_next_param),
            },
            "/register" => Route::Register,
            "/forgot-password" => Route::ForgotPassword,
            "/unauthorized" => Route::Unauthorized,
            "/app/bugs" | "/bugs" => Route::Bugs,
            "/app/bugs/new" | "/create-bug" => Route::CreateBug,
            other => {
                if let Some(id) = other
                    .strip_prefix("/app/bugs/")
                    .or_else(|| other.strip_prefix("/bugs/"))
                {
                    return id.parse().ok().map(Route::BugDetail);
                }
                let (role, _) = DASHBOARD_ROUTES
                    .iter()
                    .find(|(_, dashboard)| *dashboard == other)?;
                Route::Dashboard(*role)
            }
        };
        Some(route)
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Route::Login {
                return_to: Some(next),
            } => write!(f, "/login?next={}", urlencoding::encode(next)),
            other => f.write_str(&other.path()),
        }
    }
}

fn parse_next_param(query: &str) -> Option<String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "next")
        .and_then(|(_, value)| urlencoding::decode(value).ok())
        .map(|value| value.into_owned())
}

fn dashboard_path(role: Role) -> &'static str {
    DASHBOARD_ROUTES
        .iter()
        .find(|(candidate, _)| *candidate == role)
        .map(|(_, path)| *path)
        .unwrap_or("/unauthorized")
}

/// Landing route after login or hydration for a role name reported by the backend
///
/// Unrecognized roles land on the unauthorized page.
pub fn destination_for_role(role: &str) -> Route {
    match role.parse::<Role>() {
        Ok(role) => Route::Dashboard(role),
        Err(_) => Route::Unauthorized,
    }
}
