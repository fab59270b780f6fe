//! Accumulated effects for one evaluation scope

use crate::iam::Effect;
use std::fmt;

/// De-duplicated set of effects, iterated Allow first then Deny
///
/// Absence of Allow is an implicit deny.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Decision {
    allow: bool,
    deny: bool,
}

impl Decision {
    pub fn new() -> Self {
        Decision::default()
    }

    /// A decision holding exactly one effect
    pub fn of(effect: Effect) -> Self {
        let mut d = Decision::new();
        d.add(effect);
        d
    }

    pub fn allow() -> Self {
        Decision::of(Effect::Allow)
    }

    pub fn deny() -> Self {
        Decision::of(Effect::Deny)
    }

    pub fn add(&mut self, effect: Effect) {
        match effect {
            Effect::Allow => self.allow = true,
            Effect::Deny => self.deny = true,
        }
    }

    pub fn contains(&self, effect: Effect) -> bool {
        match effect {
            Effect::Allow => self.allow,
            Effect::Deny => self.deny,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.allow && !self.deny
    }

    pub fn len(&self) -> usize {
        self.allow as usize + self.deny as usize
    }

    /// An Allow is present and no Deny
    pub fn allowed(&self) -> bool {
        self.allow && !self.deny
    }

    /// A Deny is present or no Allow
    pub fn denied(&self) -> bool {
        self.deny || !self.allow
    }

    pub fn explicitly_denied(&self) -> bool {
        self.deny
    }

    /// Union of both effect sets
    pub fn merge(&mut self, other: Decision) {
        self.allow |= other.allow;
        self.deny |= other.deny;
    }

    pub fn merged(mut self, other: Decision) -> Self {
        self.merge(other);
        self
    }

    pub fn effects(&self) -> impl Iterator<Item = Effect> {
        let allow = self.allow.then_some(Effect::Allow);
        let deny = self.deny.then_some(Effect::Deny);
        allow.into_iter().chain(deny)
    }
}

impl FromIterator<Effect> for Decision {
    fn from_iter<I: IntoIterator<Item = Effect>>(iter: I) -> Self {
        let mut d = Decision::new();
        for effect in iter {
            d.add(effect);
        }
        d
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self
            .effects()
            .map(|e| match e {
                Effect::Allow => "Allow",
                Effect::Deny => "Deny",
            })
            .collect();
        write!(f, "[{}]", names.join(", "))
    }
}
