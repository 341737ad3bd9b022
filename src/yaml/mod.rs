//! YAML→argdata resolution.
//!
//! A container's launch arguments are declared as a YAML document and
//! materialized into an [`Argdata`](crate::argdata::Argdata) tree at spawn
//! time. Resolution is layered as a chain of factories over the document's
//! event stream:
//!
//! 1. [`YamlBuilder`] walks the parsed document as events, maintaining a
//!    stack of in-progress sequences and mappings, and calls the factory
//!    chain for every completed node.
//! 2. [`YamlCanonicalizingFactory`] rewrites the implicit `"!"`/`"?"` tags
//!    to the concrete `tag:yaml.org,2002` core tags.
//! 3. [`YamlArgdataFactory`] materializes nulls, booleans, strings,
//!    sequences and mappings.
//! 4. [`YamlFileDescriptorFactory`] recognizes the custom `tag:nuxi.nl`
//!    tags that emit file descriptors: the container log pipe, bind-mounted
//!    directories, and freshly constrained switchboard connections.
//! 5. [`YamlErrorFactory`] rejects whatever remains.
//!
//! The parser resolves YAML aliases while reading the document, so aliased
//! nodes arrive expanded, and source positions are not retained: resolver
//! errors name the offending tag or key instead.

use serde_yaml::value::Tag;
use serde_yaml::Value;
use thiserror::Error;
use tonic::Status;

mod argdata;
mod builder;
mod factory;
mod fd;

pub use argdata::YamlArgdataFactory;
pub use builder::YamlBuilder;
pub use factory::{YamlCanonicalizingFactory, YamlErrorFactory, YamlFactory};
pub use fd::YamlFileDescriptorFactory;

// Core YAML tags.
pub(crate) const TAG_STR: &str = "tag:yaml.org,2002:str";
pub(crate) const TAG_BOOL: &str = "tag:yaml.org,2002:bool";
pub(crate) const TAG_INT: &str = "tag:yaml.org,2002:int";
pub(crate) const TAG_FLOAT: &str = "tag:yaml.org,2002:float";
pub(crate) const TAG_SEQ: &str = "tag:yaml.org,2002:seq";
pub(crate) const TAG_MAP: &str = "tag:yaml.org,2002:map";

// Custom tags that emit file descriptors.
pub(crate) const TAG_CONTAINER_LOG: &str = "tag:nuxi.nl,2015:cloudabi/kubernetes/container_log";
pub(crate) const TAG_MOUNT: &str = "tag:nuxi.nl,2015:cloudabi/kubernetes/mount";
pub(crate) const TAG_SERVER: &str = "tag:nuxi.nl,2015:cloudabi/kubernetes/server";

/// The implicit tag of untagged nodes, resolved by the canonicalizing layer.
pub(crate) const TAG_IMPLICIT: &str = "?";

/// Why a document failed to resolve into argument data.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Malformed argument data document: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Unsupported null")]
    UnsupportedNull,
    #[error("Unsupported scalar with tag \"{tag}\"")]
    UnsupportedScalar { tag: String },
    #[error("Unsupported sequence with tag \"{tag}\"")]
    UnsupportedSequence { tag: String },
    #[error("Unsupported map with tag \"{tag}\"")]
    UnsupportedMap { tag: String },
    #[error("Unknown volume mount \"{path}\"")]
    UnknownMount { path: String },
    #[error("Switchboard label keys and values must be strings")]
    NonStringLabel,
    #[error("Attempted to override predefined label \"{label}\"")]
    PredefinedLabelOverride { label: String },
    #[error("Failed to constrain switchboard channel: {}", .0.message())]
    Switchboard(Status),
}

impl From<ResolveError> for Status {
    fn from(error: ResolveError) -> Status {
        Status::invalid_argument(error.to_string())
    }
}

/// One event of the document stream the builder consumes.
#[derive(Debug)]
pub(crate) enum YamlEvent {
    Null,
    Scalar { tag: String, value: String },
    SequenceStart { tag: String },
    SequenceEnd,
    MappingStart { tag: String },
    MappingEnd,
}

/// Flatten a parsed document into its event stream, in document order.
///
/// Plain scalars were already resolved by the parser, so booleans and
/// numbers arrive with their concrete core tags; untagged strings,
/// sequences and mappings carry the implicit tag for the canonicalizing
/// layer to rewrite.
pub(crate) fn events(value: &Value, tag: Option<&Tag>, out: &mut Vec<YamlEvent>) {
    match value {
        Value::Tagged(tagged) => events(&tagged.value, Some(&tagged.tag), out),
        Value::Null => out.push(YamlEvent::Null),
        Value::Bool(value) => out.push(YamlEvent::Scalar {
            tag: tag.map_or_else(|| String::from(TAG_BOOL), tag_name),
            value: value.to_string(),
        }),
        Value::Number(number) => out.push(YamlEvent::Scalar {
            tag: tag.map_or_else(
                || String::from(if number.is_f64() { TAG_FLOAT } else { TAG_INT }),
                tag_name,
            ),
            value: number.to_string(),
        }),
        Value::String(value) => out.push(YamlEvent::Scalar {
            tag: tag.map_or_else(|| String::from(TAG_IMPLICIT), tag_name),
            value: value.clone(),
        }),
        Value::Sequence(elements) => {
            out.push(YamlEvent::SequenceStart {
                tag: tag.map_or_else(|| String::from(TAG_IMPLICIT), tag_name),
            });
            for element in elements {
                events(element, None, out);
            }
            out.push(YamlEvent::SequenceEnd);
        }
        Value::Mapping(mapping) => {
            out.push(YamlEvent::MappingStart {
                tag: tag.map_or_else(|| String::from(TAG_IMPLICIT), tag_name),
            });
            for (key, value) in mapping {
                events(key, None, out);
                events(value, None, out);
            }
            out.push(YamlEvent::MappingEnd);
        }
    }
}

/// The bare tag name, without the leading `!` the parser's rendering adds.
fn tag_name(tag: &Tag) -> String {
    let rendered = tag.to_string();
    match rendered.strip_prefix('!') {
        Some(bare) => String::from(bare),
        None => rendered,
    }
}
