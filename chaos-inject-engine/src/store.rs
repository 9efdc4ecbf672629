use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use arc_swap::ArcSwap;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{Config, IgnoreList};
use crate::handler::rule::{
    AccessRule, Matcher, ResourceMatcher, ResponseRule, RouteMatcher, Rule, RuleBuilder,
    RuleError, RuleId,
};
use crate::handler::selector::{select_host, HostIdentity};
use crate::intercept::access::ResourceIdentity;
use crate::raw_config::NewRule;

/// Immutable view of every rule. Readers keep the snapshot they loaded, writers publish a new
/// one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    response: Vec<Arc<ResponseRule>>,
    #[serde(default)]
    access: Vec<Arc<AccessRule>>,
    #[serde(default)]
    last_response_id: RuleId,
    #[serde(default)]
    last_access_id: RuleId,
}

/// Selects the part of a [Snapshot] that holds the rules of one variant.
pub trait Table: Matcher {
    fn rules(snapshot: &Snapshot) -> &Vec<Arc<Rule<Self>>>;
    fn rules_mut(snapshot: &mut Snapshot) -> &mut Vec<Arc<Rule<Self>>>;
    fn last_id(snapshot: &Snapshot) -> RuleId;
    fn last_id_mut(snapshot: &mut Snapshot) -> &mut RuleId;
}

impl Table for RouteMatcher {
    fn rules(snapshot: &Snapshot) -> &Vec<Arc<Rule<Self>>> {
        &snapshot.response
    }

    fn rules_mut(snapshot: &mut Snapshot) -> &mut Vec<Arc<Rule<Self>>> {
        &mut snapshot.response
    }

    fn last_id(snapshot: &Snapshot) -> RuleId {
        snapshot.last_response_id
    }

    fn last_id_mut(snapshot: &mut Snapshot) -> &mut RuleId {
        &mut snapshot.last_response_id
    }
}

impl Table for ResourceMatcher {
    fn rules(snapshot: &Snapshot) -> &Vec<Arc<Rule<Self>>> {
        &snapshot.access
    }

    fn rules_mut(snapshot: &mut Snapshot) -> &mut Vec<Arc<Rule<Self>>> {
        &mut snapshot.access
    }

    fn last_id(snapshot: &Snapshot) -> RuleId {
        snapshot.last_access_id
    }

    fn last_id_mut(snapshot: &mut Snapshot) -> &mut RuleId {
        &mut snapshot.last_access_id
    }
}

fn newest_first<M: Matcher>(rules: &mut Vec<Arc<Rule<M>>>) {
    rules.sort_by(|a, b| {
        b.modified_at
            .cmp(&a.modified_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}

/// Registry of rules. Reads never lock: they work on the snapshot current at the time of the
/// call, so a concurrent update may or may not be observed.
#[derive(Debug)]
pub struct RuleStore {
    snapshot: ArcSwap<Snapshot>,
    host: HostIdentity,
    ignore: IgnoreList,
}

impl RuleStore {
    pub fn new(host: HostIdentity, ignore: IgnoreList) -> Self {
        Self::with_snapshot(Snapshot::default(), host, ignore)
    }

    fn with_snapshot(snapshot: Snapshot, host: HostIdentity, ignore: IgnoreList) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(snapshot),
            host,
            ignore,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, RuleError> {
        let store = Self::new(config.host.clone(), config.ignore.clone());
        store.seed(config.rules.iter().cloned())?;
        Ok(store)
    }

    pub fn host(&self) -> &HostIdentity {
        &self.host
    }

    pub fn ignore(&self) -> &IgnoreList {
        &self.ignore
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.load_full()
    }

    pub fn seed<I: IntoIterator<Item = NewRule>>(&self, rules: I) -> Result<(), RuleError> {
        for rule in rules {
            match rule {
                NewRule::Response(builder) => {
                    self.insert(builder)?;
                }
                NewRule::Access(builder) => {
                    self.insert(builder)?;
                }
            }
        }
        Ok(())
    }

    /// Validates the rule, assigns the next id of its variant and publishes it.
    pub fn insert<M: Table>(&self, builder: RuleBuilder<M>) -> Result<Arc<Rule<M>>, RuleError> {
        let rule = builder.build(0, Utc::now())?;
        let previous = self.snapshot.rcu(|current| {
            let mut next = Snapshot::clone(current);
            let id = M::last_id(&next) + 1;
            *M::last_id_mut(&mut next) = id;
            M::rules_mut(&mut next).push(Arc::new(rule.clone().with_id(id)));
            next
        });
        let rule = Arc::new(rule.with_id(M::last_id(&previous) + 1));
        info!("created rule {}", rule);
        Ok(rule)
    }

    pub fn get<M: Table>(&self, id: RuleId) -> Option<Arc<Rule<M>>> {
        M::rules(&self.snapshot.load())
            .iter()
            .find(|rule| rule.id == id)
            .cloned()
    }

    /// Most recently modified first.
    pub fn all<M: Table>(&self) -> Vec<Arc<Rule<M>>> {
        self.filtered(|_| true)
    }

    pub fn enabled<M: Table>(&self) -> Vec<Arc<Rule<M>>> {
        self.filtered(|rule| rule.enabled)
    }

    pub fn disabled<M: Table>(&self) -> Vec<Arc<Rule<M>>> {
        self.filtered(|rule| !rule.enabled)
    }

    pub fn on_host<M: Table>(&self, host: &str) -> Vec<Arc<Rule<M>>> {
        self.filtered(|rule| rule.on_host == host)
    }

    /// Rules for this host or for any host.
    pub fn on_this_host<M: Table>(&self) -> Vec<Arc<Rule<M>>> {
        self.filtered(|rule| select_host(&rule.on_host, &self.host))
    }

    fn filtered<M, F>(&self, predicate: F) -> Vec<Arc<Rule<M>>>
    where
        M: Table,
        F: Fn(&Rule<M>) -> bool,
    {
        let mut rules: Vec<_> = M::rules(&self.snapshot.load())
            .iter()
            .filter(|rule| predicate(rule))
            .cloned()
            .collect();
        newest_first(&mut rules);
        rules
    }

    pub fn enable<M: Table>(&self, id: RuleId) -> Result<Arc<Rule<M>>, RuleError> {
        self.set_enabled(id, true)
    }

    pub fn disable<M: Table>(&self, id: RuleId) -> Result<Arc<Rule<M>>, RuleError> {
        self.set_enabled(id, false)
    }

    fn set_enabled<M: Table>(&self, id: RuleId, enabled: bool) -> Result<Arc<Rule<M>>, RuleError> {
        self.get::<M>(id)
            .ok_or(RuleError::NotFound(M::KIND, id))?;
        let now = Utc::now();
        self.snapshot.rcu(|current| {
            let mut next = Snapshot::clone(current);
            for rule in M::rules_mut(&mut next).iter_mut() {
                if rule.id == id {
                    Arc::make_mut(rule).set_enabled(enabled, now);
                }
            }
            next
        });
        self.get::<M>(id).ok_or(RuleError::NotFound(M::KIND, id))
    }

    pub fn delete<M: Table>(&self, id: RuleId) -> Result<(), RuleError> {
        self.get::<M>(id)
            .ok_or(RuleError::NotFound(M::KIND, id))?;
        self.snapshot.rcu(|current| {
            let mut next = Snapshot::clone(current);
            M::rules_mut(&mut next).retain(|rule| rule.id != id);
            next
        });
        info!("deleted {} rule {}", M::KIND, id);
        Ok(())
    }

    /// Removes every rule of both variants carrying the config entry `key=value`, returning how
    /// many were removed.
    pub fn delete_tagged(&self, key: &str, value: &str) -> usize {
        let mut removed = 0;
        self.snapshot.rcu(|current| {
            let mut next = Snapshot::clone(current);
            next.response.retain(|rule| !rule.has_entry(key, value));
            next.access.retain(|rule| !rule.has_entry(key, value));
            removed = current.response.len() + current.access.len()
                - next.response.len()
                - next.access.len();
            next
        });
        info!("deleted {} rules tagged {}={}", removed, key, value);
        removed
    }

    /// Enabled rules of this host that target the route, or every route. Requests of an ignored
    /// application namespace get no rules at all.
    pub fn response_candidates<S: AsRef<str>>(
        &self,
        route_name: Option<&str>,
        namespaces: &[S],
    ) -> Vec<Arc<ResponseRule>> {
        if self.ignore.ignores_response(namespaces) {
            return vec![];
        }
        let candidates = self.filtered(|rule: &ResponseRule| {
            rule.enabled
                && select_host(&rule.on_host, &self.host)
                && (rule.matcher.route_name.is_empty()
                    || Some(rule.matcher.route_name.as_str()) == route_name)
        });
        debug!(
            "{} response candidates for route {:?}",
            candidates.len(),
            route_name
        );
        candidates
    }

    /// Enabled rules of this host whose target value equals any identity representation of the
    /// resource, whatever attribute the rule names. An empty target value matches every resource.
    /// Resources of an ignored namespace get no rules at all.
    pub fn access_candidates(&self, resource: &ResourceIdentity) -> Vec<Arc<AccessRule>> {
        if self.ignore.ignores_access(&resource.app_label) {
            return vec![];
        }
        let values = resource.values();
        let candidates = self.filtered(|rule: &AccessRule| {
            rule.enabled
                && select_host(&rule.on_host, &self.host)
                && (rule.matcher.value.is_empty()
                    || values.iter().any(|value| *value == rule.matcher.value))
        });
        debug!(
            "{} access candidates for {}",
            candidates.len(),
            resource
        );
        candidates
    }

    /// A missing file is an empty store.
    pub fn load(path: &Path, host: HostIdentity, ignore: IgnoreList) -> anyhow::Result<Self> {
        let snapshot = match fs::read(path) {
            Ok(data) => serde_json::from_slice(&data)
                .with_context(|| format!("invalid rule store {}", path.display()))?,
            Err(e) if e.kind() == ErrorKind::NotFound => Snapshot::default(),
            Err(e) => return Err(anyhow!("fail to read rule store {}: {}", path.display(), e)),
        };
        Ok(Self::with_snapshot(snapshot, host, ignore))
    }

    /// Writes the current snapshot, replacing the file atomically.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let data = serde_json::to_vec_pretty(&*self.snapshot.load_full())?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, path)?;
        debug!("saved rule store to {}", path.display());
        Ok(())
    }

    pub fn len(&self) -> usize {
        let snapshot = self.snapshot.load();
        snapshot.response.len() + snapshot.access.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
