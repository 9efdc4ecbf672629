use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::handler::rule::{Matcher, Rule, Scope};

/// How the executing node reports itself: short hostname and fully qualified name (they may be
/// equal).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostIdentity {
    pub short: String,
    pub fqdn: String,
}

impl HostIdentity {
    pub fn new(short: impl Into<String>, fqdn: impl Into<String>) -> Self {
        Self {
            short: short.into(),
            fqdn: fqdn.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    Anonymous,
    User {
        id: String,
        groups: BTreeSet<String>,
    },
}

impl Actor {
    pub fn user<I, S>(id: impl Into<String>, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Actor::User {
            id: id.into(),
            groups: groups.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for Actor {
    fn default() -> Self {
        Actor::Anonymous
    }
}

/// An empty rule host matches every node, otherwise the comparison is exact but
/// case-insensitive.
pub fn select_host(on_host: &str, host: &HostIdentity) -> bool {
    on_host.is_empty()
        || [&host.short, &host.fqdn]
            .iter()
            .any(|name| !name.is_empty() && name.eq_ignore_ascii_case(on_host))
}

/// A scope without users and groups covers everyone, anonymous actors included.
pub fn select_actor(scope: &Scope, actor: &Actor) -> bool {
    if scope.is_anyone() {
        return true;
    }
    match actor {
        Actor::Anonymous => false,
        Actor::User { id, groups } => {
            scope.for_users.contains(id) || !scope.for_groups.is_disjoint(groups)
        }
    }
}

pub fn eligible<M: Matcher>(rule: &Rule<M>, host: &HostIdentity, actor: &Actor) -> bool {
    select_host(&rule.on_host, host) && select_actor(&rule.scope, actor)
}
