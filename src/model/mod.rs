//! Volume metadata
//!
//! AFF4 volumes describe their images, maps and streams as RDF triples.
//! Readers query them through [`MetadataStore`]; [`Model`] is the in-memory
//! store filled from `information.turtle`.

pub mod turtle;

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::lexicon::{Lexicon, RDF_TYPE};

/// Object of a triple
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Node {
    /// IRI or blank node (`_:id`)
    Resource(String),
    Literal {
        value: String,
        datatype: Option<String>,
    },
}

impl Node {
    pub fn resource(iri: &str) -> Self {
        Node::Resource(iri.to_string())
    }

    pub fn literal(value: &str) -> Self {
        Node::Literal {
            value: value.to_string(),
            datatype: None,
        }
    }

    /// IRI or lexical value
    pub fn as_str(&self) -> &str {
        match self {
            Node::Resource(iri) => iri,
            Node::Literal { value, .. } => value,
        }
    }
}

// =============================================================================
// Store Trait
// =============================================================================

/// Property queries over a triple store
///
/// Implementors supply `objects` and `subjects_with`; typed reads take the
/// first matching object and return `None` when it is absent or does not
/// parse.
pub trait MetadataStore: Send + Sync {
    /// Objects of `(subject, predicate, ?)`
    fn objects(&self, subject: &str, predicate: &str) -> Vec<Node>;

    /// Subjects of `(?, predicate, object)`
    fn subjects_with(&self, predicate: &str, object: &Node) -> Vec<String>;

    fn read_string(&self, subject: &str, property: Lexicon) -> Option<String> {
        self.objects(subject, &property.value())
            .into_iter()
            .next()
            .map(|n| n.as_str().to_string())
    }

    fn read_long(&self, subject: &str, property: Lexicon) -> Option<i64> {
        self.read_string(subject, property)
            .and_then(|v| v.trim().parse().ok())
    }

    fn read_int(&self, subject: &str, property: Lexicon) -> Option<i32> {
        self.read_string(subject, property)
            .and_then(|v| v.trim().parse().ok())
    }

    /// First object that is a resource reference
    fn read_resource(&self, subject: &str, property: Lexicon) -> Option<String> {
        self.objects(subject, &property.value())
            .into_iter()
            .find_map(|n| match n {
                Node::Resource(iri) => Some(iri),
                Node::Literal { .. } => None,
            })
    }

    /// RFC 3339 date-time literal
    fn read_datetime(&self, subject: &str, property: Lexicon) -> Option<DateTime<Utc>> {
        self.read_string(subject, property).and_then(|v| {
            DateTime::parse_from_rfc3339(v.trim())
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        })
    }

    /// All resource references of a property
    fn read_resources(&self, subject: &str, property: Lexicon) -> Vec<String> {
        self.objects(subject, &property.value())
            .into_iter()
            .filter_map(|n| match n {
                Node::Resource(iri) => Some(iri),
                Node::Literal { .. } => None,
            })
            .collect()
    }

    fn has_type(&self, subject: &str, rdf_type: Lexicon) -> bool {
        let ty = Node::Resource(rdf_type.value());
        self.objects(subject, RDF_TYPE).contains(&ty)
    }

    /// Lexicon types of a subject; unrecognized IRIs are skipped
    fn types(&self, subject: &str) -> Vec<Lexicon> {
        self.objects(subject, RDF_TYPE)
            .iter()
            .map(|n| Lexicon::for_value(n.as_str()))
            .filter(|l| *l != Lexicon::Unknown)
            .collect()
    }

    fn resources_of_type(&self, rdf_type: Lexicon) -> Vec<String> {
        self.subjects_with(RDF_TYPE, &Node::Resource(rdf_type.value()))
    }

    /// Subject of type `rdf_type` whose `aff4:target` is `resource`
    fn resource_targeting(&self, resource: &str, rdf_type: Lexicon) -> Option<String> {
        self.resources_of_type(rdf_type).into_iter().find(|subject| {
            self.read_resource(subject, Lexicon::Target).as_deref() == Some(resource)
        })
    }
}

// =============================================================================
// In-memory Model
// =============================================================================

/// Triple store indexed by subject
#[derive(Debug, Default, Clone)]
pub struct Model {
    by_subject: HashMap<String, Vec<(String, Node)>>,
    len: usize,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, subject: &str, predicate: &str, object: Node) {
        let props = self.by_subject.entry(subject.to_string()).or_default();
        if props.iter().any(|(p, o)| p == predicate && *o == object) {
            return;
        }
        props.push((predicate.to_string(), object));
        self.len += 1;
    }

    /// Add `subject rdf:type <type>`
    pub fn add_type(&mut self, subject: &str, rdf_type: Lexicon) {
        self.add(subject, RDF_TYPE, Node::Resource(rdf_type.value()));
    }

    /// Add a lexicon property
    pub fn add_property(&mut self, subject: &str, property: Lexicon, object: Node) {
        self.add(subject, &property.value(), object);
    }

    /// Number of distinct triples
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn subjects(&self) -> impl Iterator<Item = &str> {
        self.by_subject.keys().map(String::as_str)
    }
}

impl MetadataStore for Model {
    fn objects(&self, subject: &str, predicate: &str) -> Vec<Node> {
        self.by_subject
            .get(subject)
            .map(|props| {
                props
                    .iter()
                    .filter(|(p, _)| p == predicate)
                    .map(|(_, o)| o.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn subjects_with(&self, predicate: &str, object: &Node) -> Vec<String> {
        let mut subjects: Vec<String> = self
            .by_subject
            .iter()
            .filter(|(_, props)| props.iter().any(|(p, o)| p == predicate && o == object))
            .map(|(s, _)| s.clone())
            .collect();
        subjects.sort();
        subjects
    }
}
