use std::fmt;

use serde::{Deserialize, Serialize};

/// Object position of a triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Term {
    Iri(String),
    Literal(String),
}

impl Term {
    pub fn iri(value: impl Into<String>) -> Self {
        Self::Iri(value.into())
    }

    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Iri(v) | Self::Literal(v) => v,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Iri(_) => "iri",
            Self::Literal(_) => "literal",
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Iri(v) => write!(f, "<{}>", v),
            Self::Literal(v) => write!(f, "{:?}", v),
        }
    }
}

/// A single subject–predicate–object fact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Triple {
    pub subject: String,
    pub predicate: String,
    pub object: Term,
}

impl Triple {
    pub fn new(subject: impl Into<String>, predicate: impl Into<String>, object: Term) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object,
        }
    }

    pub fn iri(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self::new(subject, predicate, Term::Iri(object.into()))
    }

    pub fn literal(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self::new(subject, predicate, Term::Literal(object.into()))
    }
}

/// Triple pattern; `None` positions match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriplePattern {
    pub subject: Option<String>,
    pub predicate: Option<String>,
    pub object: Option<Term>,
}

impl TriplePattern {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn predicate(mut self, predicate: impl Into<String>) -> Self {
        self.predicate = Some(predicate.into());
        self
    }

    pub fn object(mut self, object: Term) -> Self {
        self.object = Some(object);
        self
    }

    pub fn matches(&self, triple: &Triple) -> bool {
        self.subject.as_ref().map_or(true, |s| *s == triple.subject)
            && self.predicate.as_ref().map_or(true, |p| *p == triple.predicate)
            && self.object.as_ref().map_or(true, |o| *o == triple.object)
    }
}

/// "Latest event wins" existence check over timestamped state events.
///
/// Selects the event subjects carrying `scope_predicate scope_object`, reads
/// their `state_predicate` and `time_predicate` literals, and answers whether
/// some event in `active` state has no event in `clearing` state with a
/// strictly later timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowQuery {
    pub scope_predicate: String,
    pub scope_object: Term,
    pub state_predicate: String,
    pub time_predicate: String,
    pub active: String,
    pub clearing: String,
}

impl ShadowQuery {
    /// Evaluate the query over already-collected `(state, timestamp)` pairs.
    pub fn evaluate<'a, I>(&self, events: I) -> bool
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut latest_active: Option<&str> = None;
        let mut latest_clearing: Option<&str> = None;
        for (state, at) in events {
            let slot = if state == self.active {
                &mut latest_active
            } else if state == self.clearing {
                &mut latest_clearing
            } else {
                continue;
            };
            if slot.map_or(true, |current| at > current) {
                *slot = Some(at);
            }
        }
        match (latest_active, latest_clearing) {
            (Some(active), Some(clearing)) => clearing <= active,
            (Some(_), None) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn halt_query() -> ShadowQuery {
        ShadowQuery {
            scope_predicate: "type".into(),
            scope_object: Term::iri("StatusChangeEvent"),
            state_predicate: "newStatus".into(),
            time_predicate: "at".into(),
            active: "HALTED".into(),
            clearing: "OPERATIONAL".into(),
        }
    }

    #[test]
    fn pattern_matching() {
        let t = Triple::literal("s", "p", "o");
        assert!(TriplePattern::any().matches(&t));
        assert!(TriplePattern::any().subject("s").predicate("p").matches(&t));
        assert!(!TriplePattern::any().object(Term::iri("o")).matches(&t));
        assert!(TriplePattern::any().object(Term::literal("o")).matches(&t));
    }

    #[test]
    fn shadow_latest_event_wins() {
        let q = halt_query();
        assert!(!q.evaluate(Vec::<(&str, &str)>::new()));
        assert!(q.evaluate(vec![("HALTED", "2026-01-01T00:00:01Z")]));
        assert!(!q.evaluate(vec![
            ("HALTED", "2026-01-01T00:00:01Z"),
            ("OPERATIONAL", "2026-01-01T00:00:02Z"),
        ]));
        assert!(q.evaluate(vec![
            ("HALTED", "2026-01-01T00:00:01Z"),
            ("OPERATIONAL", "2026-01-01T00:00:02Z"),
            ("HALTED", "2026-01-01T00:00:03Z"),
        ]));
    }

    #[test]
    fn shadow_ties_keep_active() {
        // A clearing event must be strictly later to shadow.
        let q = halt_query();
        assert!(q.evaluate(vec![
            ("OPERATIONAL", "2026-01-01T00:00:01Z"),
            ("HALTED", "2026-01-01T00:00:01Z"),
        ]));
    }

    #[test]
    fn term_serde_is_tagged() {
        let json = serde_json::to_string(&Term::literal("3")).unwrap();
        assert_eq!(json, r#"{"kind":"literal","value":"3"}"#);
    }
}
