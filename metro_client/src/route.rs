//! Client routes.
//!
//! Two views exist: the metro map lobby at `/` and the active game at
//! `/game/<id>`. [`Router`] keeps a navigation history so the presentation
//! layer can follow it; anything else that wants to follow navigation
//! implements [`Navigator`].

use tracing::info;

/// Fallback window title for routes without one.
pub const DEFAULT_TITLE: &str = "Metro";

/// A navigable view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Metro,
    Game { game_id: String },
}

impl Route {
    pub fn game(game_id: impl Into<String>) -> Self {
        Route::Game {
            game_id: game_id.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Route::Metro => "metro",
            Route::Game { .. } => "game",
        }
    }

    pub fn path(&self) -> String {
        match self {
            Route::Metro => "/".to_string(),
            Route::Game { game_id } => format!("/game/{game_id}"),
        }
    }

    /// Window title, falling back to [`DEFAULT_TITLE`].
    pub fn title(&self) -> &'static str {
        match self {
            Route::Metro => "Metro Map",
            Route::Game { .. } => DEFAULT_TITLE,
        }
    }

    pub fn is_metro(&self) -> bool {
        matches!(self, Route::Metro)
    }

    pub fn parse(path: &str) -> Option<Self> {
        let path = path.trim_end_matches('/');
        if path.is_empty() {
            return Some(Route::Metro);
        }
        match path.strip_prefix("/game/") {
            Some(id) if !id.is_empty() && !id.contains('/') => Some(Route::game(id)),
            _ => None,
        }
    }
}

/// Receives navigation requests from the store.
pub trait Navigator {
    /// Moves to `route`. Returns false when nothing changed.
    fn navigate(&mut self, route: Route) -> bool;

    fn current(&self) -> &Route;
}

/// In-memory navigation history. Starts on [`Route::Metro`].
#[derive(Debug, Clone)]
pub struct Router {
    history: Vec<Route>,
}

impl Default for Router {
    fn default() -> Self {
        Self {
            history: vec![Route::Metro],
        }
    }
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> &Route {
        // History is never empty: it starts with one entry and `back` keeps it.
        &self.history[self.history.len() - 1]
    }

    /// Navigates to `route`. Returns false when it is already current.
    pub fn push(&mut self, route: Route) -> bool {
        if *self.current() == route {
            return false;
        }
        info!(path = %route.path(), title = route.title(), "Navigate");
        self.history.push(route);
        true
    }

    /// Goes back one entry. The first entry is never popped.
    pub fn back(&mut self) -> Option<Route> {
        if self.history.len() > 1 {
            self.history.pop()
        } else {
            None
        }
    }

    pub fn history(&self) -> &[Route] {
        &self.history
    }
}

impl Navigator for Router {
    fn navigate(&mut self, route: Route) -> bool {
        self.push(route)
    }

    fn current(&self) -> &Route {
        Router::current(self)
    }
}
