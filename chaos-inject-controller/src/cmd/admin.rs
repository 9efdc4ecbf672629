use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use chaos_inject_engine::handler::dump::dump;
use chaos_inject_engine::handler::rule::{
    AccessRule, AccessVerb, Matcher, Probability, ResourceMatcher, ResponseRule, ResponseVerb,
    RouteMatcher, Rule, RuleBuilder, RuleId, RuleKind, RuleRef, TargetAttribute,
};
use chaos_inject_engine::intercept::route::RouteTable;
use chaos_inject_engine::store::{RuleStore, Table};
use tracing::debug;

use crate::cmd::command_line::RuleArgs;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Detail {
    pub more: bool,
    pub excess: bool,
}

/// An empty `kinds` lists both variants.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub verb: Option<String>,
    pub kinds: Vec<RuleKind>,
}

impl ListFilter {
    fn includes(&self, kind: RuleKind) -> bool {
        self.kinds.is_empty() || self.kinds.contains(&kind)
    }

    fn select<M: Matcher>(&self, rule: &Rule<M>) -> bool {
        match self.verb {
            None => true,
            Some(ref verb) => rule.verb.to_string() == *verb,
        }
    }
}

fn apply_args<M: Matcher>(builder: RuleBuilder<M>, args: &RuleArgs) -> Result<RuleBuilder<M>> {
    let mut builder = builder
        .enabled(!args.disabled)
        .on_host(args.on_host.as_str())
        .for_users(args.users.iter().map(String::as_str))
        .for_groups(args.groups.iter().map(String::as_str));
    if let Some(probability) = args.probability {
        builder = builder.probability(Probability::new(probability)?);
    }
    for (key, value) in args.config_entries()? {
        builder = builder.config(key, value);
    }
    Ok(builder)
}

/// Unknown route names are reported but still accepted, the route table may be configured
/// elsewhere.
pub fn create_response<E: Write>(
    store: &RuleStore,
    routes: &RouteTable,
    verb: &str,
    route: &str,
    args: &RuleArgs,
    err: &mut E,
) -> Result<Arc<ResponseRule>> {
    let verb: ResponseVerb = verb.parse()?;
    if !route.is_empty() && !routes.contains_name(route) {
        writeln!(err, "Unknown route name {}.. still continuing", route)?;
    }
    let rule = store.insert(apply_args(RuleBuilder::response(verb, route), args)?)?;
    Ok(rule)
}

pub fn create_access(
    store: &RuleStore,
    verb: &str,
    attribute: &str,
    value: &str,
    args: &RuleArgs,
) -> Result<Arc<AccessRule>> {
    let verb: AccessVerb = verb.parse()?;
    let attribute: TargetAttribute = attribute.parse()?;
    let rule = store.insert(apply_args(RuleBuilder::access(verb, attribute, value), args)?)?;
    Ok(rule)
}

fn dump_all<M: Table, O: Write>(
    store: &RuleStore,
    filter: &ListFilter,
    detail: Detail,
    out: &mut O,
) -> Result<usize> {
    let mut count = 0;
    for rule in store.all::<M>().iter().filter(|rule| filter.select(rule)) {
        for line in dump(rule, detail.more, detail.excess) {
            writeln!(out, "{}", line)?;
        }
        count += 1;
    }
    Ok(count)
}

/// Response rules come first. Returns how many were listed.
pub fn list<O: Write, E: Write>(
    store: &RuleStore,
    filter: &ListFilter,
    detail: Detail,
    out: &mut O,
    err: &mut E,
) -> Result<usize> {
    let mut count = 0;
    if filter.includes(RuleKind::Response) {
        count += dump_all::<RouteMatcher, _>(store, filter, detail, out)?;
    }
    if filter.includes(RuleKind::Access) {
        count += dump_all::<ResourceMatcher, _>(store, filter, detail, out)?;
    }
    if count == 0 {
        writeln!(err, "No chaos rules found")?;
    }
    Ok(count)
}

fn dump_one<M: Table, O: Write>(
    store: &RuleStore,
    id: RuleId,
    detail: Detail,
    out: &mut O,
) -> Result<bool> {
    match store.get::<M>(id) {
        None => Ok(false),
        Some(rule) => {
            for line in dump(&rule, detail.more, detail.excess) {
                writeln!(out, "{}", line)?;
            }
            Ok(true)
        }
    }
}

pub fn dump_rule<O: Write, E: Write>(
    store: &RuleStore,
    kind: RuleKind,
    id: RuleId,
    detail: Detail,
    out: &mut O,
    err: &mut E,
) -> Result<bool> {
    let found = match kind {
        RuleKind::Response => dump_one::<RouteMatcher, _>(store, id, detail, out)?,
        RuleKind::Access => dump_one::<ResourceMatcher, _>(store, id, detail, out)?,
    };
    if !found {
        writeln!(err, "Rule not found")?;
    }
    Ok(found)
}

pub fn set_enabled(store: &RuleStore, kind: RuleKind, id: RuleId, enabled: bool) -> Result<RuleRef> {
    let reference = match (kind, enabled) {
        (RuleKind::Response, true) => store.enable::<RouteMatcher>(id)?.reference(),
        (RuleKind::Response, false) => store.disable::<RouteMatcher>(id)?.reference(),
        (RuleKind::Access, true) => store.enable::<ResourceMatcher>(id)?.reference(),
        (RuleKind::Access, false) => store.disable::<ResourceMatcher>(id)?.reference(),
    };
    debug!("{} is now {}", reference, if enabled { "enabled" } else { "disabled" });
    Ok(reference)
}

pub fn delete(store: &RuleStore, kind: RuleKind, id: RuleId) -> Result<RuleRef> {
    match kind {
        RuleKind::Response => store.delete::<RouteMatcher>(id)?,
        RuleKind::Access => store.delete::<ResourceMatcher>(id)?,
    }
    Ok(RuleRef { kind, id })
}
