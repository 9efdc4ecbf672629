use std::env;
use std::io::sink;
use std::sync::Arc;

use chaos_inject_controller_lib::cmd::command_line::Command;
use chaos_inject_controller_lib::cmd::execute;
use chaos_inject_controller_lib::cmd::storm::{
    storm_end, storm_start, StormTarget, STORM_KEY, STORM_VALUE,
};
use chaos_inject_controller_lib::config::Config;
use chaos_inject_engine::config::Config as EngineConfig;
use chaos_inject_engine::handler::action::{Executor, FixedDraw, RecordingSleeper};
use chaos_inject_engine::handler::rule::{
    AccessVerb, Probability, ResourceMatcher, ResponseVerb, RouteMatcher, RuleBuilder,
    RuleKind, TargetAttribute,
};
use chaos_inject_engine::handler::selector::{Actor, HostIdentity};
use chaos_inject_engine::intercept::access::ResourceIdentity;
use chaos_inject_engine::Engine;
use uuid::Uuid;

fn host() -> HostIdentity {
    HostIdentity::new("web-1", "web-1.example.org")
}

#[test]
fn test_storm_override() -> anyhow::Result<()> {
    let engine = Engine::from_config(EngineConfig::new(host()), Executor::default())?;
    let store = &engine.store;
    store.insert(RuleBuilder::response(ResponseVerb::Slow, "home"))?;
    store.insert(
        RuleBuilder::access(AccessVerb::Raise, TargetAttribute::Name, "Book")
            .config(STORM_KEY, "someone else"),
    )?;

    let target = StormTarget::new(vec!["alice".to_string(), "bob".to_string()], vec![])?;
    let created = storm_start(store, &target, Some(77.0), &mut sink())?;
    assert_eq!(created.len(), 5);

    let expected = Probability::new(77.0)?;
    for reference in created.iter() {
        let missing = || anyhow::anyhow!("{} is missing", reference);
        let (probability, tagged) = match reference.kind {
            RuleKind::Response => {
                let rule = store.get::<RouteMatcher>(reference.id).ok_or_else(missing)?;
                (rule.probability, rule.has_entry(STORM_KEY, STORM_VALUE))
            }
            RuleKind::Access => {
                let rule = store.get::<ResourceMatcher>(reference.id).ok_or_else(missing)?;
                (rule.probability, rule.has_entry(STORM_KEY, STORM_VALUE))
            }
        };
        assert_eq!(probability, expected);
        assert!(tagged);
    }

    assert_eq!(storm_end(store, &mut sink())?, 5);
    assert_eq!(store.all::<RouteMatcher>().len(), 1);
    assert_eq!(store.all::<ResourceMatcher>().len(), 1);
    Ok(())
}

#[test]
fn test_storm_reaches_the_application() -> anyhow::Result<()> {
    let path = env::temp_dir()
        .join(Uuid::new_v4().to_string())
        .with_extension("json");
    let config = || Config {
        store: path.clone(),
        engine: EngineConfig::new(host()),
    };
    let storm = Command::Storm {
        users: vec![],
        groups: vec!["qa".to_string()],
        probability: Some(100.0),
        end: false,
    };
    execute(storm, config(), &mut sink(), &mut sink())?;

    let sleeper = Arc::new(RecordingSleeper::default());
    let executor = Executor::new(Arc::new(FixedDraw(0.0)), sleeper);
    let application = Engine::load(EngineConfig::new(host()), &path, executor)?;
    let book = ResourceIdentity::new("Book", "shop.models", "shop", "ModelBase");

    assert_eq!(application.access.on_read(&book, &Actor::Anonymous), Ok(0));
    assert!(application
        .access
        .on_read(&book, &Actor::user("carol", vec!["qa"]))
        .is_err());

    let end = Command::Storm {
        users: vec![],
        groups: vec![],
        probability: None,
        end: true,
    };
    execute(end, config(), &mut sink(), &mut sink())?;
    let application = Engine::load(EngineConfig::new(host()), &path, Executor::default())?;
    assert!(application.store.is_empty());
    std::fs::remove_file(&path)?;
    Ok(())
}
