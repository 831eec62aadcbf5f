//! Path routing
//!
//! | Method   | Path         | Route        |
//! |----------|--------------|--------------|
//! | GET/POST | `/init`      | `Init`       |
//! | GET      | `/search`    | `Search`     |
//! | GET      | `/find/{id}` | `Find(id)`   |
//!
//! Reads are GET only: a HEAD would run the whole query just to drop its
//! body, so it is answered with 405 like any other method.

use super::request::Method;

/// Where a request goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Init,
    Search,
    /// `None` for `/find` without an id segment
    Find(Option<String>),
}

/// Why a request has no route
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    NotFound,
    /// The path exists; the listed methods are allowed on it
    MethodNotAllowed(&'static [&'static str]),
}

const INIT_METHODS: &[&str] = &["GET", "POST"];
const READ_METHODS: &[&str] = &["GET"];

/// Match a method and path; a trailing slash is ignored
pub fn route(method: &Method, path: &str) -> Result<Route, RouteError> {
    let trimmed = path.trim_end_matches('/');
    let segments: Vec<&str> = trimmed.split('/').skip(1).collect();

    let (route, allowed) = match segments.as_slice() {
        ["init"] => (Route::Init, INIT_METHODS),
        ["search"] => (Route::Search, READ_METHODS),
        ["find"] => (Route::Find(None), READ_METHODS),
        ["find", id] => (Route::Find(Some((*id).to_string())), READ_METHODS),
        _ => return Err(RouteError::NotFound),
    };

    if allowed.contains(&method.as_str()) {
        Ok(route)
    } else {
        Err(RouteError::MethodNotAllowed(allowed))
    }
}
