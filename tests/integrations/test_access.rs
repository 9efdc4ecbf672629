use std::env;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chaos_inject_engine::config::Config;
use chaos_inject_engine::handler::action::{Executor, FixedDraw, RecordingSleeper};
use chaos_inject_engine::handler::fault::Fault;
use chaos_inject_engine::handler::rule::{
    keys, AccessVerb, ResourceMatcher, RuleBuilder, TargetAttribute,
};
use chaos_inject_engine::handler::selector::{Actor, HostIdentity};
use chaos_inject_engine::intercept::access::{AccessOp, ResourceIdentity, OWN_NAMESPACE};
use chaos_inject_engine::Engine;
use uuid::Uuid;

fn config() -> Config {
    let mut config = Config::new(HostIdentity::new("db-1", "db-1.example.org"));
    config.ignore.access.insert("sessions".to_string());
    config
}

fn engine() -> (Engine, Arc<RecordingSleeper>) {
    let sleeper = Arc::new(RecordingSleeper::default());
    let executor = Executor::new(Arc::new(FixedDraw(0.0)), sleeper.clone());
    (Engine::from_config(config(), executor).unwrap(), sleeper)
}

fn book() -> ResourceIdentity {
    ResourceIdentity::new("Book", "shop.models", "shop", "ModelBase")
}

fn slow(attribute: TargetAttribute, value: &str, millis: u64) -> RuleBuilder<ResourceMatcher> {
    RuleBuilder::access(AccessVerb::Slow, attribute, value)
        .config(keys::SLOW_MIN, millis.to_string())
        .config(keys::SLOW_MAX, millis.to_string())
}

#[test]
fn test_ignored_namespaces_have_no_candidates() {
    let (engine, sleeper) = engine();
    let session = ResourceIdentity::new("Session", "sessions.models", "sessions", "ModelBase");
    for attribute in TargetAttribute::ALL {
        engine
            .store
            .insert(RuleBuilder::access(
                AccessVerb::Raise,
                *attribute,
                session.value_of(*attribute),
            ))
            .unwrap();
    }
    engine
        .store
        .insert(RuleBuilder::access(AccessVerb::Raise, TargetAttribute::AppLabel, ""))
        .unwrap();

    assert!(engine.store.access_candidates(&session).is_empty());
    assert_eq!(engine.access.on_read(&session, &Actor::Anonymous), Ok(0));

    let own = ResourceIdentity::new("Rule", "chaos_inject.models", OWN_NAMESPACE, "ModelBase");
    assert_eq!(engine.access.on_write(&own, &Actor::Anonymous), Ok(0));
    assert!(sleeper.slept().is_empty());

    assert_eq!(
        engine.access.on_read(&book(), &Actor::Anonymous),
        Err(Fault::Access)
    );
}

#[test]
fn test_candidates_ignore_the_attribute() {
    let (engine, sleeper) = engine();
    // "shop" is the app label of a book, not its name
    engine
        .store
        .insert(slow(TargetAttribute::Name, "shop", 10))
        .unwrap();
    engine
        .store
        .insert(slow(TargetAttribute::AppLabel, "shop", 20))
        .unwrap();
    engine
        .store
        .insert(slow(TargetAttribute::Module, "shop.models", 40))
        .unwrap();

    assert_eq!(engine.store.access_candidates(&book()).len(), 3);
    assert_eq!(engine.access.on_write(&book(), &Actor::Anonymous), Ok(2));
    let total: Duration = sleeper.slept().iter().sum();
    assert_eq!(total, Duration::from_millis(60));
}

#[test]
fn test_guard() {
    let (engine, _) = engine();
    let actor = Actor::user("alice", vec!["qa"]);
    engine
        .store
        .insert(
            RuleBuilder::access(AccessVerb::Raise, TargetAttribute::Name, "Book")
                .for_groups(vec!["qa"])
                .config(keys::EXCEPTION, "PermissionDenied"),
        )
        .unwrap();

    let mut rows = vec![];
    let result = engine
        .access
        .guard(AccessOp::Write, &book(), &actor, || rows.push("Dune"));
    assert_eq!(result, Err(Fault::PermissionDenied));
    assert!(rows.is_empty());

    let result = engine
        .access
        .guard(AccessOp::Write, &book(), &Actor::Anonymous, || rows.push("Dune"));
    assert_eq!(result, Ok(()));
    assert_eq!(rows, vec!["Dune"]);
}

#[test]
fn test_concurrent_readers() {
    let (engine, _) = engine();
    let rule = engine
        .store
        .insert(slow(TargetAttribute::ClassName, "ModelBase", 1))
        .unwrap();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let access = engine.access.clone();
            thread::spawn(move || {
                let mut performed = 0;
                for _ in 0..200 {
                    performed += access.on_read(&book(), &Actor::Anonymous).unwrap();
                }
                performed
            })
        })
        .collect();
    for _ in 0..50 {
        engine.store.disable::<ResourceMatcher>(rule.id).unwrap();
        engine.store.enable::<ResourceMatcher>(rule.id).unwrap();
    }
    for reader in readers {
        assert!(reader.join().unwrap() <= 200);
    }
    assert!(engine.store.get::<ResourceMatcher>(rule.id).unwrap().enabled);
}

#[test]
fn test_persisted_rules() {
    let path = env::temp_dir()
        .join(Uuid::new_v4().to_string())
        .with_extension("json");
    let (engine, _) = engine();
    engine
        .store
        .insert(slow(TargetAttribute::Name, "Book", 5).on_host("db-1"))
        .unwrap();
    engine.store.save(&path).unwrap();

    let sleeper = Arc::new(RecordingSleeper::default());
    let executor = Executor::new(Arc::new(FixedDraw(0.0)), sleeper.clone());
    let loaded = Engine::load(config(), &path, executor).unwrap();
    assert_eq!(loaded.store.len(), 1);
    assert_eq!(loaded.access.on_read(&book(), &Actor::Anonymous), Ok(1));
    assert_eq!(sleeper.slept(), vec![Duration::from_millis(5)]);

    let next = loaded
        .store
        .insert(slow(TargetAttribute::Name, "Book", 5))
        .unwrap();
    assert_eq!(next.id, 2);
    std::fs::remove_file(&path).unwrap();
}
