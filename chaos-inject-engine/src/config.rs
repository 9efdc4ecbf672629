use std::collections::BTreeSet;

use crate::handler::selector::HostIdentity;
use crate::intercept::route::RouteTable;
use crate::raw_config::NewRule;

/// Namespaces that never see chaos, one list per interceptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreList {
    pub access: BTreeSet<String>,
    pub response: BTreeSet<String>,
}

impl IgnoreList {
    pub fn ignores_access(&self, namespace: &str) -> bool {
        self.access.contains(namespace)
    }

    pub fn ignores_response<S: AsRef<str>>(&self, namespaces: &[S]) -> bool {
        namespaces
            .iter()
            .any(|namespace| self.response.contains(namespace.as_ref()))
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: HostIdentity,
    pub ignore: IgnoreList,
    pub routes: RouteTable,
    pub rules: Vec<NewRule>,
}

impl Config {
    pub fn new(host: HostIdentity) -> Self {
        Self {
            host,
            ignore: IgnoreList::default(),
            routes: RouteTable::default(),
            rules: vec![],
        }
    }
}
