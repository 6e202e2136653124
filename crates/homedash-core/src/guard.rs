// ── Route authentication guard ──
//
// Decides where a navigation request ends up given the session. The route
// table mirrors the dashboard's screens; only the login screen is public,
// and the `/admin` tree is limited to administrators.

use homedash_api::Session;

pub const LOGIN: &str = "login";
pub const HOME: &str = "home";

/// A navigable dashboard screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub name: &'static str,
    pub path: &'static str,
    pub requires_admin: bool,
}

const fn route(name: &'static str, path: &'static str) -> Route {
    Route {
        name,
        path,
        requires_admin: false,
    }
}

const fn admin(name: &'static str, path: &'static str) -> Route {
    Route {
        name,
        path,
        requires_admin: true,
    }
}

/// Every screen of the dashboard.
pub const ROUTES: &[Route] = &[
    route(LOGIN, "/login"),
    route(HOME, "/"),
    route("history", "/history"),
    route("debug", "/debug"),
    route("scenes", "/scenes"),
    admin("admin-users", "/admin/users"),
    admin("admin-devices", "/admin/devices"),
    admin("admin-alerts", "/admin/alerts"),
    admin("admin-debug-tools", "/admin/debug-tools"),
    admin("admin-console", "/admin/console"),
];

impl Route {
    /// Look a route up by name.
    pub fn named(name: &str) -> Option<&'static Route> {
        ROUTES.iter().find(|r| r.name == name)
    }

    /// Resolve a path, ignoring any query string and trailing slash.
    /// `/admin` resolves to its first child.
    pub fn resolve(path: &str) -> Option<&'static Route> {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let trimmed = path.trim_end_matches('/');
        let path = if trimmed.is_empty() { "/" } else { trimmed };
        if path == "/admin" {
            return Self::named("admin-users");
        }
        ROUTES.iter().find(|r| r.path == path)
    }
}

/// Guard verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    /// Show the requested screen.
    Proceed,
    /// Send the user to the home screen instead.
    Home,
    /// Send the user to login, returning to `redirect` afterwards.
    Login { redirect: String },
}

/// Decide a navigation against an already-initialized session.
///
/// `full_path` is what the user asked for, kept verbatim (query included)
/// as the post-login redirect target.
pub fn decide(route: &Route, full_path: &str, session: &Session) -> Navigation {
    if route.name == LOGIN {
        return if session.is_authenticated() {
            Navigation::Home
        } else {
            Navigation::Proceed
        };
    }
    if !session.is_authenticated() {
        return Navigation::Login {
            redirect: full_path.to_owned(),
        };
    }
    if route.requires_admin && !session.is_admin() {
        return Navigation::Home;
    }
    Navigation::Proceed
}
