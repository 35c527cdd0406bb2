//! `information.turtle` loading

use std::io::Cursor;

use rio_api::model::{Literal, Subject, Term};
use rio_api::parser::TriplesParser;
use rio_turtle::{TurtleError, TurtleParser};
use tracing::debug;

use super::{Model, Node};
use crate::error::{Aff4Error, Aff4Result};

/// Parse turtle text into `model`; returns the number of triples read
pub fn load_into(model: &mut Model, content: &[u8]) -> Aff4Result<usize> {
    let mut parser = TurtleParser::new(Cursor::new(content), None);
    let mut count = 0usize;

    parser
        .parse_all(&mut |t| {
            let subject = match t.subject {
                Subject::NamedNode(node) => node.iri.to_string(),
                Subject::BlankNode(node) => format!("_:{}", node.id),
                _ => return Ok(()),
            };
            let object = match t.object {
                Term::NamedNode(node) => Node::Resource(node.iri.to_string()),
                Term::BlankNode(node) => Node::Resource(format!("_:{}", node.id)),
                Term::Literal(lit) => match lit {
                    Literal::Simple { value } => Node::literal(value),
                    Literal::LanguageTaggedString { value, .. } => Node::literal(value),
                    Literal::Typed { value, datatype } => Node::Literal {
                        value: value.to_string(),
                        datatype: Some(datatype.iri.to_string()),
                    },
                },
                _ => return Ok(()),
            };
            model.add(&subject, t.predicate.iri, object);
            count += 1;
            Ok(()) as Result<(), TurtleError>
        })
        .map_err(|e| Aff4Error::Format(format!("turtle parse error: {}", e)))?;

    debug!(triples = count, "Loaded turtle metadata");
    Ok(count)
}

/// Parse turtle text into a new model
pub fn parse(content: &[u8]) -> Aff4Result<Model> {
    let mut model = Model::new();
    load_into(&mut model, content)?;
    Ok(model)
}
