use crate::handler::rule::{Matcher, Rule};

#[derive(Debug, Clone, PartialEq)]
pub enum DumpValue {
    Text(String),
    Number(u64),
    List(Vec<String>),
}

fn dump_value(label: &str, value: &DumpValue, lines: &mut Vec<String>) {
    match value {
        DumpValue::Text(text) if text.is_empty() => lines.push(format!("{}: ''", label)),
        DumpValue::Text(text) => lines.push(format!("{}: {}", label, text)),
        DumpValue::Number(number) => lines.push(format!("{}: {}", label, number)),
        DumpValue::List(items) => {
            if !items.is_empty() {
                lines.push(label.to_string());
                lines.extend(items.iter().map(|item| format!("  - {}", item)));
            }
        }
    }
}

/// Render a rule as human readable lines, ended by a blank separator line.
///
/// Without flags only id, verb, enabled state and probability are rendered. `more` adds the
/// matcher, the scope and the config entries, `excess` implies `more` and adds timestamps.
pub fn dump<M: Matcher>(rule: &Rule<M>, more: bool, excess: bool) -> Vec<String> {
    let mut fields = vec![
        ("id", DumpValue::Number(rule.id)),
        ("verb", DumpValue::Text(rule.verb.to_string())),
        ("enabled", DumpValue::Text(rule.humanized_enabled().to_string())),
        ("probability", DumpValue::Text(rule.probability.to_string())),
    ];
    if more || excess {
        fields.extend(rule.matcher.dump_fields());
        fields.push((
            "for users",
            DumpValue::List(rule.scope.for_users.iter().cloned().collect()),
        ));
        fields.push((
            "for groups",
            DumpValue::List(rule.scope.for_groups.iter().cloned().collect()),
        ));
        fields.push(("on host", DumpValue::Text(rule.on_host.clone())));
        fields.push((
            "additional config",
            DumpValue::List(rule.config.iter().map(ToString::to_string).collect()),
        ));
    }
    if excess {
        fields.push(("creation time", DumpValue::Text(rule.created_at.to_rfc3339())));
        fields.push((
            "modification time",
            DumpValue::Text(rule.modified_at.to_rfc3339()),
        ));
    }

    let mut lines = vec![];
    for (label, value) in fields.iter() {
        dump_value(label, value, &mut lines);
    }
    lines.push(String::new());
    lines
}
