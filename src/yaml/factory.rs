//! The factory trait and the two stateless layers of the resolution chain.

use crate::argdata::Argdata;

use super::{ResolveError, TAG_IMPLICIT, TAG_MAP, TAG_SEQ, TAG_STR};

/// One layer of the resolution chain. The builder calls the outermost layer
/// for every completed node; layers handle the tags they recognize and
/// delegate the rest to their fallback.
pub trait YamlFactory {
    fn get_null(&mut self) -> Result<Argdata, ResolveError>;
    fn get_scalar(&mut self, tag: &str, value: &str) -> Result<Argdata, ResolveError>;
    fn get_sequence(&mut self, tag: &str, elements: Vec<Argdata>) -> Result<Argdata, ResolveError>;
    fn get_map(
        &mut self,
        tag: &str,
        keys: Vec<Argdata>,
        values: Vec<Argdata>,
    ) -> Result<Argdata, ResolveError>;
}

/// Rewrites the implicit `"!"` and `"?"` tags to concrete core tags before
/// the downstream layers see them.
pub struct YamlCanonicalizingFactory<'a> {
    fallback: &'a mut dyn YamlFactory,
}

impl<'a> YamlCanonicalizingFactory<'a> {
    pub fn new(fallback: &'a mut dyn YamlFactory) -> Self {
        Self { fallback }
    }
}

impl YamlFactory for YamlCanonicalizingFactory<'_> {
    fn get_null(&mut self) -> Result<Argdata, ResolveError> {
        self.fallback.get_null()
    }

    fn get_scalar(&mut self, tag: &str, value: &str) -> Result<Argdata, ResolveError> {
        let tag = if tag == "!" || tag == TAG_IMPLICIT {
            TAG_STR
        } else {
            tag
        };
        self.fallback.get_scalar(tag, value)
    }

    fn get_sequence(&mut self, tag: &str, elements: Vec<Argdata>) -> Result<Argdata, ResolveError> {
        let tag = if tag == "!" || tag == TAG_IMPLICIT {
            TAG_SEQ
        } else {
            tag
        };
        self.fallback.get_sequence(tag, elements)
    }

    fn get_map(
        &mut self,
        tag: &str,
        keys: Vec<Argdata>,
        values: Vec<Argdata>,
    ) -> Result<Argdata, ResolveError> {
        let tag = if tag == "!" || tag == TAG_IMPLICIT {
            TAG_MAP
        } else {
            tag
        };
        self.fallback.get_map(tag, keys, values)
    }
}

/// The end of the chain: everything that reaches it is unsupported.
pub struct YamlErrorFactory;

impl YamlFactory for YamlErrorFactory {
    fn get_null(&mut self) -> Result<Argdata, ResolveError> {
        Err(ResolveError::UnsupportedNull)
    }

    fn get_scalar(&mut self, tag: &str, _value: &str) -> Result<Argdata, ResolveError> {
        Err(ResolveError::UnsupportedScalar {
            tag: String::from(tag),
        })
    }

    fn get_sequence(
        &mut self,
        tag: &str,
        _elements: Vec<Argdata>,
    ) -> Result<Argdata, ResolveError> {
        Err(ResolveError::UnsupportedSequence {
            tag: String::from(tag),
        })
    }

    fn get_map(
        &mut self,
        tag: &str,
        _keys: Vec<Argdata>,
        _values: Vec<Argdata>,
    ) -> Result<Argdata, ResolveError> {
        Err(ResolveError::UnsupportedMap {
            tag: String::from(tag),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalizes_implicit_tags_only() {
        let mut error_factory = YamlErrorFactory;
        let mut factory = YamlCanonicalizingFactory::new(&mut error_factory);

        // Implicit tags come out concrete; the error layer reports what it saw.
        match factory.get_scalar("?", "x") {
            Err(ResolveError::UnsupportedScalar { tag }) => assert_eq!(tag, TAG_STR),
            other => panic!("unexpected: {other:?}"),
        }
        match factory.get_sequence("!", Vec::new()) {
            Err(ResolveError::UnsupportedSequence { tag }) => assert_eq!(tag, TAG_SEQ),
            other => panic!("unexpected: {other:?}"),
        }
        match factory.get_map("?", Vec::new(), Vec::new()) {
            Err(ResolveError::UnsupportedMap { tag }) => assert_eq!(tag, TAG_MAP),
            other => panic!("unexpected: {other:?}"),
        }

        // Concrete tags pass through untouched.
        match factory.get_scalar("tag:example.com,2024:custom", "x") {
            Err(ResolveError::UnsupportedScalar { tag }) => {
                assert_eq!(tag, "tag:example.com,2024:custom");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
