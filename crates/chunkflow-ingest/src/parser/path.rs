//! Typed JSON paths
//!
//! A path is a sequence of object keys and array indices, compared segment by
//! segment. `recipes` addresses the top-level `recipes` member; `data.items`
//! a nested one; `batches.2.rows` walks through an array element. The empty
//! path addresses the document root.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Index(usize),
    Key(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JsonPath(Vec<PathSegment>);

impl JsonPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn new(segments: Vec<PathSegment>) -> Self {
        Self(segments)
    }

    /// Path made of object keys only
    pub fn keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(keys.into_iter().map(|k| PathSegment::Key(k.into())).collect())
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for JsonPath {
    type Err = String;

    /// Dot-separated; all-digit segments become array indices
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s == "$" {
            return Ok(Self::root());
        }

        s.split('.')
            .map(|part| {
                if part.is_empty() {
                    Err(format!("empty segment in path '{}'", s))
                } else if part.bytes().all(|b| b.is_ascii_digit()) {
                    part.parse::<usize>()
                        .map(PathSegment::Index)
                        .map_err(|e| format!("invalid index '{}': {}", part, e))
                } else {
                    Ok(PathSegment::Key(part.to_string()))
                }
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}

impl std::fmt::Display for JsonPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            return f.write_str("$");
        }
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            match segment {
                PathSegment::Key(key) => f.write_str(key)?,
                PathSegment::Index(index) => write!(f, "{}", index)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mixed_path() {
        let path: JsonPath = "batches.2.rows".parse().unwrap();
        assert_eq!(
            path.segments(),
            &[
                PathSegment::Key("batches".into()),
                PathSegment::Index(2),
                PathSegment::Key("rows".into()),
            ]
        );
        assert_eq!(path.to_string(), "batches.2.rows");
    }

    #[test]
    fn test_parse_root() {
        assert!("".parse::<JsonPath>().unwrap().is_empty());
        assert!("$".parse::<JsonPath>().unwrap().is_empty());
        assert_eq!(JsonPath::root().to_string(), "$");
    }

    #[test]
    fn test_parse_rejects_empty_segment() {
        assert!("a..b".parse::<JsonPath>().is_err());
    }

    #[test]
    fn test_serde_untagged_segments() {
        let path = JsonPath::new(vec![PathSegment::Key("data".into()), PathSegment::Index(0)]);
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, r#"["data",0]"#);
        let back: JsonPath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
    }
}
