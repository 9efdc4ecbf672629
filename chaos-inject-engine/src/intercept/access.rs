use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::handler::action::Executor;
use crate::handler::fault::Fault;
use crate::handler::rule::TargetAttribute;
use crate::handler::selector::{eligible, Actor};
use crate::store::RuleStore;

/// Data access in the engine's own namespace never sees chaos.
pub const OWN_NAMESPACE: &str = "chaos_inject";

/// The resource type a data-access call works on, in each of the representations an access
/// rule can target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceIdentity {
    pub name: String,
    pub module: String,
    /// Owning application namespace.
    pub app_label: String,
    pub class_name: String,
}

impl ResourceIdentity {
    pub fn new(
        name: impl Into<String>,
        module: impl Into<String>,
        app_label: impl Into<String>,
        class_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
            app_label: app_label.into(),
            class_name: class_name.into(),
        }
    }

    pub fn value_of(&self, attribute: TargetAttribute) -> &str {
        match attribute {
            TargetAttribute::Name => &self.name,
            TargetAttribute::Module => &self.module,
            TargetAttribute::AppLabel => &self.app_label,
            TargetAttribute::ClassName => &self.class_name,
        }
    }

    pub fn values(&self) -> [&str; 4] {
        [&self.name, &self.module, &self.app_label, &self.class_name]
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.app_label, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessOp {
    Read,
    Write,
}

/// Brings chaos to data-access calls. Every matching rule runs, so slow effects add up and the
/// first raise aborts the call.
#[derive(Debug, Clone)]
pub struct AccessInterceptor {
    store: Arc<RuleStore>,
    executor: Executor,
}

impl AccessInterceptor {
    pub fn new(store: Arc<RuleStore>, executor: Executor) -> Self {
        Self { store, executor }
    }

    fn ignored(&self, resource: &ResourceIdentity) -> bool {
        resource.app_label == OWN_NAMESPACE || self.store.ignore().ignores_access(&resource.app_label)
    }

    /// Returns how many effects ran.
    #[instrument(skip(self))]
    pub fn intercept(
        &self,
        op: AccessOp,
        resource: &ResourceIdentity,
        actor: &Actor,
    ) -> Result<usize, Fault> {
        if self.ignored(resource) {
            return Ok(0);
        }
        let mut performed = 0;
        for rule in self
            .store
            .access_candidates(resource)
            .iter()
            .filter(|rule| eligible(rule, self.store.host(), actor))
        {
            let actual = resource.value_of(rule.matcher.attribute);
            if !rule.matcher.value.is_empty() && actual != rule.matcher.value {
                debug!(
                    "{}: {} is {:?}, not {:?}",
                    rule.reference(),
                    rule.matcher.attribute,
                    actual,
                    rule.matcher.value
                );
                continue;
            }
            if self.executor.perform_access(rule)? {
                performed += 1;
            }
        }
        Ok(performed)
    }

    pub fn on_read(&self, resource: &ResourceIdentity, actor: &Actor) -> Result<usize, Fault> {
        self.intercept(AccessOp::Read, resource, actor)
    }

    pub fn on_write(&self, resource: &ResourceIdentity, actor: &Actor) -> Result<usize, Fault> {
        self.intercept(AccessOp::Write, resource, actor)
    }

    /// Runs chaos for the call and then the call itself, unless a fault was injected.
    pub fn guard<T, F>(
        &self,
        op: AccessOp,
        resource: &ResourceIdentity,
        actor: &Actor,
        call: F,
    ) -> Result<T, Fault>
    where
        F: FnOnce() -> T,
    {
        self.intercept(op, resource, actor)?;
        Ok(call())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::IgnoreList;
    use crate::handler::action::{FixedDraw, RecordingSleeper};
    use crate::handler::rule::{keys, AccessVerb, RuleBuilder};
    use crate::handler::selector::HostIdentity;

    fn book() -> ResourceIdentity {
        ResourceIdentity::new("Book", "shop.models", "shop", "ModelBase")
    }

    fn interceptor(ignore: IgnoreList) -> (AccessInterceptor, Arc<RuleStore>, Arc<RecordingSleeper>) {
        let store = Arc::new(RuleStore::new(HostIdentity::new("db-1", "db-1"), ignore));
        let sleeper = Arc::new(RecordingSleeper::default());
        let executor = Executor::new(Arc::new(FixedDraw(0.0)), sleeper.clone());
        (
            AccessInterceptor::new(store.clone(), executor),
            store,
            sleeper,
        )
    }

    fn slow(attribute: TargetAttribute, value: &str, millis: &str) -> RuleBuilder<crate::handler::rule::ResourceMatcher> {
        RuleBuilder::access(AccessVerb::Slow, attribute, value)
            .config(keys::SLOW_MIN, millis)
            .config(keys::SLOW_MAX, millis)
    }

    #[test]
    fn test_slow_effects_stack() {
        let (interceptor, store, sleeper) = interceptor(IgnoreList::default());
        store.insert(slow(TargetAttribute::Name, "Book", "10")).unwrap();
        store.insert(slow(TargetAttribute::AppLabel, "shop", "20")).unwrap();
        store.insert(slow(TargetAttribute::Name, "Author", "40")).unwrap();

        assert_eq!(interceptor.on_read(&book(), &Actor::Anonymous), Ok(2));
        let total: Duration = sleeper.slept().iter().sum();
        assert_eq!(total, Duration::from_millis(30));
    }

    #[test]
    fn test_attribute_narrows_candidates() {
        let (interceptor, store, sleeper) = interceptor(IgnoreList::default());
        // a candidate through the module representation, but the named attribute differs
        store
            .insert(slow(TargetAttribute::Name, "shop.models", "10"))
            .unwrap();
        assert_eq!(store.access_candidates(&book()).len(), 1);
        assert_eq!(interceptor.on_write(&book(), &Actor::Anonymous), Ok(0));
        assert!(sleeper.slept().is_empty());
    }

    #[test]
    fn test_raise_aborts() {
        let (interceptor, store, _) = interceptor(IgnoreList::default());
        store
            .insert(
                RuleBuilder::access(AccessVerb::Raise, TargetAttribute::ClassName, "ModelBase")
                    .config(keys::EXCEPTION, "Timeout"),
            )
            .unwrap();
        let mut called = false;
        let res = interceptor.guard(AccessOp::Read, &book(), &Actor::Anonymous, || called = true);
        assert_eq!(res, Err(Fault::Timeout));
        assert!(!called);
    }

    #[test]
    fn test_ignored_namespaces() {
        let mut ignore = IgnoreList::default();
        ignore.access.insert("sessions".to_string());
        let (interceptor, store, _) = interceptor(ignore);
        store
            .insert(RuleBuilder::access(AccessVerb::Raise, TargetAttribute::AppLabel, ""))
            .unwrap();

        let own = ResourceIdentity::new("Rule", "chaos_inject.store", OWN_NAMESPACE, "Store");
        let session = ResourceIdentity::new("Session", "sessions.models", "sessions", "ModelBase");
        assert_eq!(interceptor.on_read(&own, &Actor::Anonymous), Ok(0));
        assert_eq!(interceptor.on_write(&session, &Actor::Anonymous), Ok(0));
        assert_eq!(
            interceptor.on_read(&book(), &Actor::Anonymous),
            Err(Fault::Access)
        );
    }

    #[test]
    fn test_scope() {
        let (interceptor, store, _) = interceptor(IgnoreList::default());
        store
            .insert(slow(TargetAttribute::Name, "Book", "5").for_users(vec!["alice"]))
            .unwrap();
        store
            .insert(slow(TargetAttribute::Name, "Book", "5").on_host("db-2"))
            .unwrap();
        assert_eq!(interceptor.on_read(&book(), &Actor::Anonymous), Ok(0));
        assert_eq!(
            interceptor.on_read(&book(), &Actor::user("alice", Vec::<String>::new())),
            Ok(1)
        );
    }

    #[test]
    fn test_guard_passes_through() {
        let (interceptor, _, _) = interceptor(IgnoreList::default());
        assert_eq!(
            interceptor.guard(AccessOp::Write, &book(), &Actor::Anonymous, || 42),
            Ok(42)
        );
    }
}
