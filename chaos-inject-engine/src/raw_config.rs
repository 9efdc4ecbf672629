use std::collections::BTreeSet;
use std::convert::{TryFrom, TryInto};

use anyhow::Error;
use serde::{Deserialize, Serialize};
use wildmatch::WildMatch;

use crate::config::{Config, IgnoreList};
use crate::handler::rule::{
    AccessVerb, Probability, ResourceMatcher, ResponseVerb, RouteMatcher, RuleBuilder, RuleError,
    TargetAttribute,
};
use crate::handler::selector::HostIdentity;
use crate::host;
use crate::intercept::route::{Route, RouteTable};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(deny_unknown_fields)] // To prevent typos.
pub struct RawConfig {
    /// Overrides the host identity reported by the OS.
    pub hostname: Option<HostIdentity>,
    /// Namespaces whose data-access calls never see chaos.
    #[serde(default)]
    pub ignore_access: Vec<String>,
    /// Application namespaces whose requests never see chaos.
    #[serde(default)]
    pub ignore_response: Vec<String>,
    #[serde(default)]
    pub routes: Vec<RawRoute>,
    /// Rules seeded into the store at startup.
    #[serde(default)]
    pub rules: Vec<RawRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RawRoute {
    /// Route name, requests on unnamed routes only see wildcard rules.
    pub name: Option<String>,
    /// Match path of the request with wildcard matches.
    ///
    /// The path component is **case sensitive**.
    /// [wildcard matches](https://www.wikiwand.com/en/Matching_wildcards)
    pub path: String,
    #[serde(default)]
    pub namespaces: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RawRule {
    Response {
        verb: String,
        /// Route name, empty for every route.
        #[serde(default)]
        route: String,
        #[serde(flatten)]
        common: RawRuleCommon,
    },
    Access {
        verb: String,
        attribute: Option<String>,
        #[serde(default)]
        value: String,
        #[serde(flatten)]
        common: RawRuleCommon,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
pub struct RawRuleCommon {
    pub probability: Option<f64>,
    pub enabled: Option<bool>,
    pub on_host: Option<String>,
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub config: Vec<RawConfigEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RawConfigEntry {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub enum NewRule {
    Response(RuleBuilder<RouteMatcher>),
    Access(RuleBuilder<ResourceMatcher>),
}

impl TryFrom<RawRule> for NewRule {
    type Error = RuleError;

    fn try_from(raw: RawRule) -> Result<Self, Self::Error> {
        match raw {
            RawRule::Response {
                verb,
                route,
                common,
            } => {
                let verb: ResponseVerb = verb.parse()?;
                Ok(NewRule::Response(
                    common.apply(RuleBuilder::response(verb, route.trim()))?,
                ))
            }
            RawRule::Access {
                verb,
                attribute,
                value,
                common,
            } => {
                let verb: AccessVerb = verb.parse()?;
                let attribute = attribute
                    .as_deref()
                    .map(str::parse::<TargetAttribute>)
                    .transpose()?
                    .unwrap_or_else(TargetAttribute::default);
                Ok(NewRule::Access(
                    common.apply(RuleBuilder::access(verb, attribute, value))?,
                ))
            }
        }
    }
}

impl RawRuleCommon {
    fn apply<M>(self, builder: RuleBuilder<M>) -> Result<RuleBuilder<M>, RuleError>
    where
        M: crate::handler::rule::Matcher,
    {
        let mut builder = builder
            .probability(
                self.probability
                    .map(Probability::new)
                    .transpose()?
                    .unwrap_or_default(),
            )
            .enabled(self.enabled.unwrap_or(true))
            .on_host(self.on_host.unwrap_or_default())
            .for_users(self.users)
            .for_groups(self.groups);
        for entry in self.config {
            builder = builder.config(entry.key, entry.value);
        }
        Ok(builder)
    }
}

impl From<RawRoute> for Route {
    fn from(raw: RawRoute) -> Self {
        Route {
            name: raw.name.filter(|name| !name.is_empty()),
            path: WildMatch::new(&raw.path),
            namespaces: raw.namespaces,
        }
    }
}

impl TryFrom<RawConfig> for Config {
    type Error = Error;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        Ok(Self {
            host: raw.hostname.unwrap_or_else(host::current),
            ignore: IgnoreList {
                access: raw.ignore_access.into_iter().collect::<BTreeSet<_>>(),
                response: raw.ignore_response.into_iter().collect::<BTreeSet<_>>(),
            },
            routes: RouteTable::new(raw.routes.into_iter().map(Into::into).collect()),
            rules: raw
                .rules
                .into_iter()
                .map(TryInto::try_into)
                .collect::<Result<Vec<_>, RuleError>>()?,
        })
    }
}
