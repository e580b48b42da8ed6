//! Registry of aligned-column generator functions.
//!
//! A generator derives the synthetic `item_id` join key from the
//! structural attributes accumulated for an atom. The registry is a
//! closed set of named pure functions; picking an unknown name is a
//! configuration error.

use crate::db::Value;
use crate::errors::{ExtractError, ProcError};
use rustc_hash::FxHashMap;

/// Attribute values accumulated for the current atom.
pub type AttrMap = FxHashMap<String, Value>;

/// A generator bound to the attribute names it consumes.
pub type AlignedColGenFn = fn(&AttrMap, &[String]) -> Result<String, ProcError>;

/// Looks a generator up by its configured name.
pub fn get_generator(name: &str) -> Result<AlignedColGenFn, ExtractError> {
    match name {
        "identity" => Ok(identity),
        "intercorp" => Ok(intercorp),
        "empty" => Ok(empty),
        _ => Err(ExtractError::ConfigInvalid(format!(
            "unknown aligned column generator function: {name}"
        ))),
    }
}

/// Names of all registered generators, for help screens.
pub fn generator_names() -> Vec<&'static str> {
    vec!["identity", "intercorp", "empty"]
}

fn fetch_string_vals(attrs: &AttrMap, use_attrs: &[String]) -> Result<Vec<String>, ProcError> {
    use_attrs
        .iter()
        .map(|attr| match attrs.get(attr) {
            Some(Value::Str(s)) => Ok(s.clone()),
            Some(other) => Err(ProcError::GeneratorFailure(format!(
                "cannot accept non-string value {other:?} (key: {attr})"
            ))),
            None => Err(ProcError::GeneratorFailure(format!(
                "missing value for key {attr}"
            ))),
        })
        .collect()
}

/// Joins the selected attribute values with underscores.
fn identity(attrs: &AttrMap, use_attrs: &[String]) -> Result<String, ProcError> {
    Ok(fetch_string_vals(attrs, use_attrs)?.join("_"))
}

/// Drops the two-character language prefix (and its colon separator,
/// when present) of the first selected value: `en:abc` -> `abc`.
fn intercorp(attrs: &AttrMap, use_attrs: &[String]) -> Result<String, ProcError> {
    let vals = fetch_string_vals(attrs, use_attrs)?;
    let first = vals.first().ok_or_else(|| {
        ProcError::GeneratorFailure("intercorp requires an argument column".to_owned())
    })?;
    let mut chars = first.char_indices();
    match (chars.next(), chars.next()) {
        (Some(_), Some(_)) => {
            let tail = chars.next().map(|(pos, _)| pos).unwrap_or(first.len());
            Ok(first[tail..].strip_prefix(':').unwrap_or(&first[tail..]).to_owned())
        }
        _ => Err(ProcError::GeneratorFailure(format!(
            "value too short for intercorp: {first}"
        ))),
    }
}

fn empty(_attrs: &AttrMap, _use_attrs: &[String]) -> Result<String, ProcError> {
    Ok(String::new())
}

#[cfg(test)]
mod test {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> AttrMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::Str(v.to_string())))
            .collect()
    }

    #[test]
    fn identity_joins_with_underscore() {
        let a = attrs(&[("doc_id", "d1"), ("p_id", "p9")]);
        let cols = vec!["doc_id".to_owned(), "p_id".to_owned()];
        assert_eq!(identity(&a, &cols).unwrap(), "d1_p9");
    }

    #[test]
    fn identity_is_deterministic() {
        let a = attrs(&[("doc_id", "d1")]);
        let cols = vec!["doc_id".to_owned()];
        assert_eq!(identity(&a, &cols).unwrap(), identity(&a, &cols).unwrap());
    }

    #[test]
    fn identity_rejects_missing_value() {
        let a = attrs(&[]);
        let cols = vec!["doc_id".to_owned()];
        assert!(matches!(
            identity(&a, &cols),
            Err(ProcError::GeneratorFailure(_))
        ));
    }

    #[test]
    fn identity_rejects_non_string() {
        let mut a = attrs(&[]);
        a.insert("poscount".to_owned(), Value::Int(12));
        let cols = vec!["poscount".to_owned()];
        assert!(identity(&a, &cols).is_err());
    }

    #[test]
    fn intercorp_strips_prefix() {
        let a = attrs(&[("doc_id", "en:abc")]);
        let cols = vec!["doc_id".to_owned()];
        assert_eq!(intercorp(&a, &cols).unwrap(), "abc");
    }

    #[test]
    fn intercorp_without_separator() {
        let a = attrs(&[("doc_id", "csdoc1")]);
        let cols = vec!["doc_id".to_owned()];
        assert_eq!(intercorp(&a, &cols).unwrap(), "doc1");
    }

    #[test]
    fn intercorp_rejects_short_value() {
        let a = attrs(&[("doc_id", "e")]);
        let cols = vec!["doc_id".to_owned()];
        assert!(intercorp(&a, &cols).is_err());
    }

    #[test]
    fn empty_returns_empty() {
        assert_eq!(empty(&attrs(&[]), &[]).unwrap(), "");
    }

    #[test]
    fn unknown_generator_rejected() {
        assert!(get_generator("md5").is_err());
        assert!(get_generator("identity").is_ok());
    }
}
