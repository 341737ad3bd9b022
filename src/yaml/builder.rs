//! The builder: drives the factory chain over a document's event stream.

use serde_yaml::Value;

use crate::argdata::Argdata;

use super::{events, ResolveError, YamlEvent, YamlFactory};

/// Builds an argdata tree from a YAML document by feeding the document's
/// events through a factory chain, maintaining a stack of in-progress
/// sequences and mappings.
pub struct YamlBuilder<'a> {
    factory: &'a mut dyn YamlFactory,
}

/// An in-progress composite on the parsing stack.
enum Composite {
    Sequence {
        tag: String,
        elements: Vec<Argdata>,
    },
    Mapping {
        tag: String,
        keys: Vec<Argdata>,
        values: Vec<Argdata>,
    },
}

impl<'a> YamlBuilder<'a> {
    pub fn new(factory: &'a mut dyn YamlFactory) -> Self {
        Self { factory }
    }

    pub fn build(mut self, input: &str) -> Result<Argdata, ResolveError> {
        // An empty document resolves to the chain's null representation.
        let document: Value = if input.trim().is_empty() {
            Value::Null
        } else {
            serde_yaml::from_str(input)?
        };
        let mut stream = Vec::new();
        events(&document, None, &mut stream);

        let mut stack: Vec<Composite> = Vec::new();
        let mut root = self.factory.get_null()?;
        for event in stream {
            match event {
                YamlEvent::Null => {
                    let node = self.factory.get_null()?;
                    append(&mut stack, &mut root, node);
                }
                YamlEvent::Scalar { tag, value } => {
                    let node = self.factory.get_scalar(&tag, &value)?;
                    append(&mut stack, &mut root, node);
                }
                YamlEvent::SequenceStart { tag } => stack.push(Composite::Sequence {
                    tag,
                    elements: Vec::new(),
                }),
                YamlEvent::SequenceEnd => {
                    let Some(Composite::Sequence { tag, elements }) = stack.pop() else {
                        unreachable!("sequence end without matching start");
                    };
                    let node = self.factory.get_sequence(&tag, elements)?;
                    append(&mut stack, &mut root, node);
                }
                YamlEvent::MappingStart { tag } => stack.push(Composite::Mapping {
                    tag,
                    keys: Vec::new(),
                    values: Vec::new(),
                }),
                YamlEvent::MappingEnd => {
                    let Some(Composite::Mapping { tag, keys, values }) = stack.pop() else {
                        unreachable!("mapping end without matching start");
                    };
                    let node = self.factory.get_map(&tag, keys, values)?;
                    append(&mut stack, &mut root, node);
                }
            }
        }
        assert!(
            stack.is_empty(),
            "Composite structures remain on the parsing stack"
        );
        Ok(root)
    }
}

/// Attach a completed node to the enclosing composite, or make it the root.
/// Mapping nodes alternate between keys and values.
fn append(stack: &mut Vec<Composite>, root: &mut Argdata, node: Argdata) {
    match stack.last_mut() {
        None => *root = node,
        Some(Composite::Sequence { elements, .. }) => elements.push(node),
        Some(Composite::Mapping { keys, values, .. }) => {
            if keys.len() == values.len() {
                keys.push(node);
            } else {
                values.push(node);
            }
        }
    }
}
