//! The core layer: materializes plain YAML values into argdata nodes.

use crate::argdata::Argdata;

use super::{ResolveError, YamlFactory, TAG_BOOL, TAG_MAP, TAG_SEQ, TAG_STR};

pub struct YamlArgdataFactory<'a> {
    fallback: &'a mut dyn YamlFactory,
}

impl<'a> YamlArgdataFactory<'a> {
    pub fn new(fallback: &'a mut dyn YamlFactory) -> Self {
        Self { fallback }
    }
}

impl YamlFactory for YamlArgdataFactory<'_> {
    fn get_null(&mut self) -> Result<Argdata, ResolveError> {
        Ok(Argdata::Null)
    }

    fn get_scalar(&mut self, tag: &str, value: &str) -> Result<Argdata, ResolveError> {
        match (tag, value) {
            (TAG_STR, _) => Ok(Argdata::Str(String::from(value))),
            (TAG_BOOL, "true") => Ok(Argdata::Bool(true)),
            (TAG_BOOL, "false") => Ok(Argdata::Bool(false)),
            _ => self.fallback.get_scalar(tag, value),
        }
    }

    fn get_sequence(&mut self, tag: &str, elements: Vec<Argdata>) -> Result<Argdata, ResolveError> {
        if tag == TAG_SEQ {
            Ok(Argdata::Seq(elements))
        } else {
            self.fallback.get_sequence(tag, elements)
        }
    }

    fn get_map(
        &mut self,
        tag: &str,
        keys: Vec<Argdata>,
        values: Vec<Argdata>,
    ) -> Result<Argdata, ResolveError> {
        if tag == TAG_MAP {
            Ok(Argdata::Map(keys.into_iter().zip(values).collect()))
        } else {
            self.fallback.get_map(tag, keys, values)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::YamlErrorFactory;
    use super::*;

    #[test]
    fn materializes_core_tags() {
        let mut error_factory = YamlErrorFactory;
        let mut factory = YamlArgdataFactory::new(&mut error_factory);

        assert_eq!(factory.get_null().unwrap(), Argdata::Null);
        assert_eq!(
            factory.get_scalar(TAG_STR, "x").unwrap(),
            Argdata::Str(String::from("x"))
        );
        assert_eq!(
            factory.get_scalar(TAG_BOOL, "true").unwrap(),
            Argdata::Bool(true)
        );
        assert_eq!(
            factory.get_sequence(TAG_SEQ, vec![Argdata::Null]).unwrap(),
            Argdata::Seq(vec![Argdata::Null])
        );
        assert_eq!(
            factory
                .get_map(
                    TAG_MAP,
                    vec![Argdata::Str(String::from("k"))],
                    vec![Argdata::Bool(false)],
                )
                .unwrap(),
            Argdata::Map(vec![(
                Argdata::Str(String::from("k")),
                Argdata::Bool(false),
            )])
        );
    }

    #[test]
    fn malformed_booleans_fall_through() {
        let mut error_factory = YamlErrorFactory;
        let mut factory = YamlArgdataFactory::new(&mut error_factory);
        assert!(matches!(
            factory.get_scalar(TAG_BOOL, "yes"),
            Err(ResolveError::UnsupportedScalar { .. })
        ));
    }
}
