//! Range specifications: `A`, `A-B`, `A-B*M+C` and `A-B=C-D`.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};

use super::note::parse_note_name;
use crate::error::CompileError;
use crate::route::Route;

const TOKEN: &str = r"[+-]?(?:[A-G][b#]?-?[0-9]|[0-9]*\.?[0-9]+)";
const NUMBER: &str = r"[0-9]*\.?[0-9]+";

static RANGE_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
static SYMBOL_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

fn range_regex() -> Option<&'static Regex> {
    RANGE_PATTERN
        .get_or_init(|| {
            let pattern = format!(
                r"^(?P<a>{tok})(?:-(?P<b>{tok}))?(?:\*(?P<mul>[+-]?{num})(?P<add>[+-]{num})?|=(?P<c>{tok})(?:-(?P<d>{tok}))?)?$",
                tok = TOKEN,
                num = NUMBER
            );
            Regex::new(&pattern).ok()
        })
        .as_ref()
}

fn symbol_regex() -> Option<&'static Regex> {
    SYMBOL_PATTERN
        .get_or_init(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_.]*").ok())
        .as_ref()
}

/// How a parsed range maps its domain.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RangeTransform {
    /// `A` or `A-B`: values pass through unchanged.
    Identity,
    /// `A-B*M+C`
    Affine { mul: f64, add: f64 },
    /// `A-B=C-D`
    FromTo { tomin: f64, tomax: f64 },
}

/// A parsed but not yet resolved range.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RangeSpec {
    pub min: f64,
    pub max: f64,
    pub transform: RangeTransform,
}

impl RangeSpec {
    pub fn identity(min: f64, max: f64) -> Self {
        Self {
            min,
            max,
            transform: RangeTransform::Identity,
        }
    }

    pub fn is_plain(&self) -> bool {
        self.transform == RangeTransform::Identity
    }

    pub fn to_route(self) -> Route {
        match self.transform {
            RangeTransform::Identity => Route::identity(self.min, self.max),
            RangeTransform::Affine { mul, add } => Route::affine(self.min, self.max, mul, add),
            RangeTransform::FromTo { tomin, tomax } => {
                Route::fromto(self.min, self.max, tomin, tomax)
            }
        }
    }

    /// Merge a match-side range with a destination-side range.
    ///
    /// The left side supplies the domain and must be plain. A plain right
    /// side becomes the destination range; a transforming right side lends
    /// its transform to the left domain.
    pub fn combine(left: RangeSpec, right: RangeSpec, text: &str) -> Result<RangeSpec, CompileError> {
        if !left.is_plain() {
            return Err(CompileError::new(
                text,
                "a transforming match range cannot be combined with a destination range",
            ));
        }
        let transform = match right.transform {
            RangeTransform::Identity => RangeTransform::FromTo {
                tomin: right.min,
                tomax: right.max,
            },
            RangeTransform::FromTo { tomin, tomax } => RangeTransform::FromTo { tomin, tomax },
            affine @ RangeTransform::Affine { .. } => affine,
        };
        Ok(RangeSpec {
            min: left.min,
            max: left.max,
            transform,
        })
    }
}

fn substitute_names(text: &str, names: &HashMap<String, String>) -> String {
    if names.is_empty() {
        return text.to_string();
    }
    match symbol_regex() {
        Some(re) => re
            .replace_all(text, |caps: &Captures| {
                let word = &caps[0];
                names.get(word).cloned().unwrap_or_else(|| word.to_string())
            })
            .into_owned(),
        None => text.to_string(),
    }
}

fn parse_token(token: &str, text: &str) -> Result<f64, CompileError> {
    if let Some(note) = parse_note_name(token) {
        return Ok(note as f64);
    }
    token
        .parse::<f64>()
        .map_err(|_| CompileError::new(text, format!("'{}' is not a number or note name", token)))
}

/// Parse a range specification, resolving names first.
pub fn parse_range(text: &str, names: &HashMap<String, String>) -> Result<RangeSpec, CompileError> {
    let resolved: String = substitute_names(text.trim(), names)
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    let re = range_regex()
        .ok_or_else(|| CompileError::new(text, "range grammar failed to initialise"))?;

    let caps = match re.captures(&resolved) {
        Some(caps) => caps,
        None => {
            let unresolved = symbol_regex().and_then(|sym| {
                sym.find_iter(&resolved)
                    .map(|m| m.as_str())
                    .find(|word| parse_note_name(word).is_none())
                    .map(str::to_string)
            });
            let reason = match unresolved {
                Some(word) => format!("unresolved symbol '{}'", word),
                None => "malformed range, expected A, A-B, A-B*M+C or A-B=C-D".to_string(),
            };
            return Err(CompileError::new(text, reason));
        }
    };

    let min = parse_token(&caps["a"], text)?;
    let max = match caps.name("b") {
        Some(b) => parse_token(b.as_str(), text)?,
        None => min,
    };

    let transform = if let Some(mul) = caps.name("mul") {
        let mul = parse_token(mul.as_str(), text)?;
        let add = match caps.name("add") {
            Some(add) => parse_token(add.as_str(), text)?,
            None => 0.0,
        };
        RangeTransform::Affine { mul, add }
    } else if let Some(c) = caps.name("c") {
        let tomin = parse_token(c.as_str(), text)?;
        let tomax = match caps.name("d") {
            Some(d) => parse_token(d.as_str(), text)?,
            None => tomin,
        };
        RangeTransform::FromTo { tomin, tomax }
    } else {
        RangeTransform::Identity
    };

    Ok(RangeSpec { min, max, transform })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<RangeSpec, CompileError> {
        parse_range(text, &HashMap::new())
    }

    #[test]
    fn test_single_value_and_range() {
        assert_eq!(parse("7").unwrap(), RangeSpec::identity(7.0, 7.0));
        assert_eq!(parse("0-127").unwrap(), RangeSpec::identity(0.0, 127.0));
        assert_eq!(parse("-5--1").unwrap(), RangeSpec::identity(-5.0, -1.0));
    }

    #[test]
    fn test_affine() {
        let spec = parse("1-16*2+1").unwrap();
        assert_eq!((spec.min, spec.max), (1.0, 16.0));
        assert_eq!(spec.transform, RangeTransform::Affine { mul: 2.0, add: 1.0 });

        let spec = parse("0-127*0.5-3").unwrap();
        assert_eq!(spec.transform, RangeTransform::Affine { mul: 0.5, add: -3.0 });

        let spec = parse("0-127*-1").unwrap();
        assert_eq!(spec.transform, RangeTransform::Affine { mul: -1.0, add: 0.0 });
    }

    #[test]
    fn test_fromto_route_endpoints() {
        let route = parse("0-127=20-100").unwrap().to_route();
        assert_eq!(route.apply(route.min), route.tomin);
        assert!((route.apply(route.max) - route.tomax).abs() < 1e-9);
        assert_eq!((route.tomin, route.tomax), (20.0, 100.0));
    }

    #[test]
    fn test_note_names_in_ranges() {
        let spec = parse("C-1-C4").unwrap();
        assert_eq!((spec.min, spec.max), (0.0, 60.0));

        let spec = parse("C4-B4=C3-B3").unwrap();
        assert_eq!(spec.transform, RangeTransform::FromTo { tomin: 48.0, tomax: 59.0 });
    }

    #[test]
    fn test_names_are_substituted() {
        let mut names = HashMap::new();
        names.insert("drums".to_string(), "10".to_string());
        names.insert("low".to_string(), "C2".to_string());
        let spec = parse_range("drums", &names).unwrap();
        assert_eq!(spec, RangeSpec::identity(10.0, 10.0));
        let spec = parse_range("low-C3", &names).unwrap();
        assert_eq!((spec.min, spec.max), (36.0, 48.0));
    }

    #[test]
    fn test_unresolved_symbol_is_an_error() {
        let err = parse("bass-10").unwrap_err();
        assert!(err.reason.contains("unresolved symbol 'bass'"));
        assert_eq!(err.text, "bass-10");

        let err = parse("1-2-3").unwrap_err();
        assert!(err.reason.contains("malformed"));
    }

    #[test]
    fn test_combine() {
        let left = RangeSpec::identity(0.0, 127.0);
        let right = parse("0-100").unwrap();
        let merged = RangeSpec::combine(left, right, "x").unwrap();
        assert_eq!(merged.transform, RangeTransform::FromTo { tomin: 0.0, tomax: 100.0 });

        let right = parse("1-16*1+2").unwrap();
        let merged = RangeSpec::combine(RangeSpec::identity(3.0, 3.0), right, "x").unwrap();
        assert_eq!((merged.min, merged.max), (3.0, 3.0));
        assert_eq!(merged.to_route().apply(3.0), 5.0);

        let transforming = parse("0-127*2").unwrap();
        assert!(RangeSpec::combine(transforming, left, "x").is_err());
    }
}
