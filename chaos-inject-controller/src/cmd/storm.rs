use std::io::Write;

use anyhow::{anyhow, Result};
use chaos_inject_engine::handler::rule::{
    AccessVerb, Matcher, Probability, ResponseVerb, RuleBuilder, RuleRef, TargetAttribute, Verb,
};
use chaos_inject_engine::store::RuleStore;
use tracing::info;

/// Config entry tagging storm rules, so `storm --end` finds them.
pub const STORM_KEY: &str = "creator";
pub const STORM_VALUE: &str = "storm";

/// Storm aims at one failing request out of 10, split over the response verbs.
pub fn default_response_probability() -> f64 {
    10.0 / ResponseVerb::ALL.len() as f64
}

/// A request runs about 30 data-access calls, so access rules fire 30 times less often.
pub fn default_access_probability() -> f64 {
    1.0 / 30.0 / AccessVerb::ALL.len() as f64
}

/// Users or groups, never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StormTarget {
    Users(Vec<String>),
    Groups(Vec<String>),
}

impl StormTarget {
    pub fn new(users: Vec<String>, groups: Vec<String>) -> Result<Self> {
        match (users.is_empty(), groups.is_empty()) {
            (false, false) => Err(anyhow!("--users and --groups can not be used together")),
            (true, true) => Err(anyhow!("a storm needs --users or --groups")),
            (false, true) => Ok(StormTarget::Users(users)),
            (true, false) => Ok(StormTarget::Groups(groups)),
        }
    }

    fn scope<M: Matcher>(&self, builder: RuleBuilder<M>) -> RuleBuilder<M> {
        match self {
            StormTarget::Users(users) => builder.for_users(users.iter().map(String::as_str)),
            StormTarget::Groups(groups) => builder.for_groups(groups.iter().map(String::as_str)),
        }
    }
}

/// Creates one wildcard rule per verb of each variant. `probability` overrides the defaults of
/// both variants.
pub fn storm_start<O: Write>(
    store: &RuleStore,
    target: &StormTarget,
    probability: Option<f64>,
    out: &mut O,
) -> Result<Vec<RuleRef>> {
    let response_probability =
        Probability::new(probability.unwrap_or_else(default_response_probability))?;
    let access_probability =
        Probability::new(probability.unwrap_or_else(default_access_probability))?;

    let mut created = vec![];
    for verb in ResponseVerb::ALL {
        let builder = RuleBuilder::response(*verb, "")
            .probability(response_probability)
            .config(STORM_KEY, STORM_VALUE);
        let rule = store.insert(target.scope(builder))?;
        writeln!(out, "Created response rule\t{}", rule)?;
        created.push(rule.reference());
    }
    for verb in AccessVerb::ALL {
        let builder = RuleBuilder::access(*verb, TargetAttribute::AppLabel, "")
            .probability(access_probability)
            .config(STORM_KEY, STORM_VALUE);
        let rule = store.insert(target.scope(builder))?;
        writeln!(out, "Created access rule\t{}", rule)?;
        created.push(rule.reference());
    }
    info!("storm started with {} rules", created.len());
    Ok(created)
}

pub fn storm_end<O: Write>(store: &RuleStore, out: &mut O) -> Result<usize> {
    let deleted = store.delete_tagged(STORM_KEY, STORM_VALUE);
    writeln!(out, "Deleted {} storm rules", deleted)?;
    Ok(deleted)
}
