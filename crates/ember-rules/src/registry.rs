//! Subscription table.

use std::collections::HashMap;

use ember_common::types::{EventType, FieldPosition, ObjectType};
use serde::Serialize;

use crate::binding::RuleBinding;

#[derive(Debug, Clone)]
struct Subscription {
    binding: RuleBinding,
    /// Empty means any change.
    fields: Vec<FieldPosition>,
}

impl Subscription {
    fn interested_in(&self, changed: &[FieldPosition]) -> bool {
        self.fields.is_empty() || self.fields.iter().any(|f| changed.contains(f))
    }
}

/// A subscription as reported by `list_subscribed_rules`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscribedRule {
    /// Ruleset name.
    pub ruleset: String,
    /// Rule name.
    pub rule: String,
    /// Subscribed type; invalid for transaction rules.
    pub object_type: ObjectType,
    /// Subscribed event.
    pub event_type: EventType,
    /// Subscribed fields; empty unless a field rule.
    pub fields: Vec<FieldPosition>,
    /// Declaring source line, 0 if unknown.
    pub line_number: u32,
}

/// Narrows `list_subscribed_rules` output. Unset criteria match anything.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    ruleset: Option<String>,
    object_type: Option<ObjectType>,
    event_type: Option<EventType>,
    field: Option<FieldPosition>,
}

impl SubscriptionFilter {
    /// Matches every subscription.
    pub fn all() -> Self {
        Self::default()
    }

    /// Only rules in `ruleset`.
    #[must_use]
    pub fn ruleset(mut self, ruleset: &str) -> Self {
        self.ruleset = Some(ruleset.to_string());
        self
    }

    /// Only subscriptions on `object_type`.
    #[must_use]
    pub fn object_type(mut self, object_type: ObjectType) -> Self {
        self.object_type = Some(object_type);
        self
    }

    /// Only subscriptions to `event_type`.
    #[must_use]
    pub fn event_type(mut self, event_type: EventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    /// Only field subscriptions including `field`.
    #[must_use]
    pub fn field(mut self, field: FieldPosition) -> Self {
        self.field = Some(field);
        self
    }

    fn matches(&self, object_type: ObjectType, event: EventType, sub: &Subscription) -> bool {
        self.ruleset
            .as_deref()
            .map_or(true, |r| r == sub.binding.ruleset())
            && self.object_type.map_or(true, |t| t == object_type)
            && self.event_type.map_or(true, |e| e == event)
            && self.field.map_or(true, |f| sub.fields.contains(&f))
    }
}

/// Subscriptions keyed by `(type, event)`, each list in subscription order.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    table: HashMap<(ObjectType, EventType), Vec<Subscription>>,
}

impl Registry {
    /// Returns an existing binding with the same name but another handler.
    pub fn conflicting(&self, binding: &RuleBinding) -> Option<&RuleBinding> {
        self.table
            .values()
            .flatten()
            .map(|s| &s.binding)
            .find(|b| *b == binding && !b.same_handler(binding))
    }

    /// Adds a subscription. Returns false if the rule was already subscribed
    /// to `(object_type, event)`, in which case field lists are merged.
    pub fn add(
        &mut self,
        object_type: ObjectType,
        event: EventType,
        binding: &RuleBinding,
        fields: &[FieldPosition],
    ) -> bool {
        let subs = self.table.entry((object_type, event)).or_default();
        if let Some(existing) = subs.iter_mut().find(|s| s.binding == *binding) {
            if existing.fields.is_empty() || fields.is_empty() {
                existing.fields.clear();
            } else {
                for field in fields {
                    if !existing.fields.contains(field) {
                        existing.fields.push(*field);
                    }
                }
                existing.fields.sort_unstable();
            }
            return false;
        }

        let mut fields = fields.to_vec();
        fields.sort_unstable();
        fields.dedup();
        subs.push(Subscription {
            binding: binding.clone(),
            fields,
        });
        true
    }

    /// Removes `ruleset::rule` from `(object_type, event)`.
    pub fn remove(
        &mut self,
        object_type: ObjectType,
        event: EventType,
        ruleset: &str,
        rule: &str,
    ) -> bool {
        let key = (object_type, event);
        let Some(subs) = self.table.get_mut(&key) else {
            return false;
        };
        let before = subs.len();
        subs.retain(|s| !s.binding.is_named(ruleset, rule));
        let removed = subs.len() != before;
        if subs.is_empty() {
            self.table.remove(&key);
        }
        removed
    }

    /// Removes every subscription and returns how many there were.
    pub fn clear(&mut self) -> usize {
        let count = self.len();
        self.table.clear();
        count
    }

    /// Returns the bindings to invoke for an event, in subscription order.
    pub fn matching(
        &self,
        object_type: ObjectType,
        event: EventType,
        changed: &[FieldPosition],
    ) -> Vec<RuleBinding> {
        self.table
            .get(&(object_type, event))
            .map(|subs| {
                subs.iter()
                    .filter(|s| event != EventType::RowUpdate || s.interested_in(changed))
                    .map(|s| s.binding.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Lists subscriptions matching `filter`.
    pub fn list(&self, filter: &SubscriptionFilter) -> Vec<SubscribedRule> {
        let mut keys: Vec<_> = self.table.keys().copied().collect();
        keys.sort_unstable();

        let mut rules = Vec::new();
        for (object_type, event) in keys {
            for sub in &self.table[&(object_type, event)] {
                if !filter.matches(object_type, event, sub) {
                    continue;
                }
                rules.push(SubscribedRule {
                    ruleset: sub.binding.ruleset().to_string(),
                    rule: sub.binding.rule().to_string(),
                    object_type,
                    event_type: event,
                    fields: sub.fields.clone(),
                    line_number: sub.binding.line_number(),
                });
            }
        }
        rules
    }

    /// Returns the number of subscriptions.
    pub fn len(&self) -> usize {
        self.table.values().map(Vec::len).sum()
    }
}
