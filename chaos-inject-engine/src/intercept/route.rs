use wildmatch::WildMatch;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedRoute {
    pub name: Option<String>,
    /// Application namespaces the route belongs to.
    pub namespaces: Vec<String>,
}

/// Maps a request path to its route. `None` means the path is not routable and the request is
/// left alone.
pub trait RouteResolver: Send + Sync {
    fn resolve(&self, path: &str) -> Option<ResolvedRoute>;
}

#[derive(Debug, Clone)]
pub struct Route {
    pub name: Option<String>,
    pub path: WildMatch,
    pub namespaces: Vec<String>,
}

/// First match wins.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.routes
            .iter()
            .any(|route| route.name.as_deref() == Some(name))
    }
}

impl RouteResolver for RouteTable {
    fn resolve(&self, path: &str) -> Option<ResolvedRoute> {
        self.routes
            .iter()
            .find(|route| route.path.matches(path))
            .map(|route| ResolvedRoute {
                name: route.name.clone(),
                namespaces: route.namespaces.clone(),
            })
    }
}
