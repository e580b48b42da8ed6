use crate::errors::ExtractError;

/// A single string normalisation step applied to a positional
/// attribute value before it enters the n-gram dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringTransformer {
    Identity,
    ToLower,
    FirstChar,
    Penn2Pos,
}

impl StringTransformer {
    pub fn from_name(name: &str) -> Result<StringTransformer, ExtractError> {
        match name {
            "" | "identity" => Ok(StringTransformer::Identity),
            "toLower" => Ok(StringTransformer::ToLower),
            "firstChar" => Ok(StringTransformer::FirstChar),
            "penn2pos" => Ok(StringTransformer::Penn2Pos),
            _ => Err(ExtractError::ConfigInvalid(format!(
                "unknown modder function: {name}"
            ))),
        }
    }

    pub fn transform(&self, s: &str) -> String {
        match self {
            StringTransformer::Identity => s.to_owned(),
            StringTransformer::ToLower => s.to_lowercase(),
            StringTransformer::FirstChar => {
                s.chars().next().map(String::from).unwrap_or_default()
            }
            StringTransformer::Penn2Pos => penn2pos(s).to_owned(),
        }
    }
}

/// Maps a Penn Treebank tag to a single-letter PoS code.
fn penn2pos(tag: &str) -> &'static str {
    match tag {
        "CC" => "J",
        "CD" => "C",
        "IN" => "R",
        "JJ" | "JJR" | "JJS" => "A",
        "NN" | "NNS" => "N",
        "PRP" | "PRP$" | "WP" | "WP$" => "P",
        "RB" | "RBR" | "RBS" | "WRB" => "D",
        "RP" => "T",
        "UH" => "I",
        "VB" | "VBD" | "VBG" | "VBN" | "VBP" | "VBZ" | "WDT" => "V",
        _ => "X",
    }
}

/// An ordered chain of transformers, configured as a colon-separated
/// list of names (e.g. `"toLower:firstChar"`).
#[derive(Debug, Clone, Default)]
pub struct TransformerChain {
    fns: Vec<StringTransformer>,
}

impl TransformerChain {
    pub fn parse(names: &str) -> Result<TransformerChain, ExtractError> {
        if names.is_empty() {
            return Ok(TransformerChain { fns: vec![] });
        }
        let fns = names
            .split(':')
            .map(StringTransformer::from_name)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TransformerChain { fns })
    }

    pub fn transform(&self, s: &str) -> String {
        let mut ans = s.to_owned();
        for f in &self.fns {
            ans = f.transform(&ans);
        }
        ans
    }
}
