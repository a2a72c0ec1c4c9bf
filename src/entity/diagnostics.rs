//! Diagnostics: redundancy warning and out-of-range index sets (§3
//! "Diagnostics"), with the legacy snapshot shape accepted on read (Open
//! Question, resolved in DESIGN.md).

use std::collections::BTreeSet;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::identifiers::{ControlIndex, StreamIndex};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
  pub redundancy_warning: bool,
  #[serde(
    serialize_with = "serialize_index_set",
    deserialize_with = "deserialize_index_set_with_legacy_shape"
  )]
  pub stream_input_over_latency: BTreeSet<StreamIndex>,
  pub control_out_of_range: BTreeSet<ControlIndex>,
}

fn serialize_index_set<S: Serializer>(
  set: &BTreeSet<StreamIndex>,
  serializer: S,
) -> Result<S::Ok, S::Error> {
  let raw: Vec<u16> = set.iter().map(|i| i.0).collect();
  raw.serialize(serializer)
}

/// Accepts both the modern shape (`[3, 7]`, a plain set of indices) and the
/// legacy shape (`[[3, true], [7, false]]`, a map-of-bool encoded as an
/// array of `[index, bool]` pairs), detecting the legacy shape by checking
/// whether the first element is itself a two-element array.
fn deserialize_index_set_with_legacy_shape<'de, D: Deserializer<'de>>(
  deserializer: D,
) -> Result<BTreeSet<StreamIndex>, D::Error> {
  let value = serde_json::Value::deserialize(deserializer)?;
  let array = value
    .as_array()
    .ok_or_else(|| D::Error::custom("streamInputOverLatency must be an array"))?;

  let is_legacy_shape = array
    .first()
    .map(|first| first.is_array() && first.as_array().map(|a| a.len() == 2).unwrap_or(false))
    .unwrap_or(false);

  let mut out = BTreeSet::new();
  if is_legacy_shape {
    for entry in array {
      let pair = entry
        .as_array()
        .ok_or_else(|| D::Error::custom("legacy entry must be a [index, bool] pair"))?;
      let index = pair
        .first()
        .and_then(|v| v.as_u64())
        .ok_or_else(|| D::Error::custom("legacy entry index must be an integer"))?;
      let flagged = pair.get(1).and_then(|v| v.as_bool()).unwrap_or(false);
      if flagged {
        out.insert(StreamIndex(index as u16));
      }
    }
  } else {
    for entry in array {
      let index = entry
        .as_u64()
        .ok_or_else(|| D::Error::custom("stream index must be an integer"))?;
      out.insert(StreamIndex(index as u16));
    }
  }
  Ok(out)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[derive(Debug, Serialize, Deserialize)]
  struct Wrapper {
    #[serde(
      serialize_with = "serialize_index_set",
      deserialize_with = "deserialize_index_set_with_legacy_shape"
    )]
    set: BTreeSet<StreamIndex>,
  }

  #[test]
  fn modern_shape_round_trips() {
    let mut set = BTreeSet::new();
    set.insert(StreamIndex(3));
    set.insert(StreamIndex(7));
    let w = Wrapper { set: set.clone() };
    let json = serde_json::to_string(&w).unwrap();
    assert_eq!(json, r#"{"set":[3,7]}"#);
    let back: Wrapper = serde_json::from_str(&json).unwrap();
    assert_eq!(back.set, set);
  }

  #[test]
  fn legacy_shape_keeps_only_true_entries() {
    let json = r#"{"set":[[3,true],[7,false],[9,true]]}"#;
    let w: Wrapper = serde_json::from_str(json).unwrap();
    let expected: BTreeSet<StreamIndex> = [StreamIndex(3), StreamIndex(9)].into_iter().collect();
    assert_eq!(w.set, expected);
  }

  #[test]
  fn diagnostics_default_is_empty() {
    let d = Diagnostics::default();
    assert!(!d.redundancy_warning);
    assert!(d.stream_input_over_latency.is_empty());
  }
}
