use std::cmp::Ordering;

use tae_catalog::ColumnZoneMap;
use tae_primitives::Value;

/// Variable-length values beyond this many bytes have their zone-map max
/// truncated to the prefix, marked by a flag.
pub const ZONE_MAP_MAX_PREFIX_BYTES: usize = 64;

/// Builds a `(min, max, truncated?)` summary over a column's values,
/// skipping nulls.
pub fn build_zone_map(values: &[Value]) -> ColumnZoneMap {
    let mut min: Option<Value> = None;
    let mut max: Option<Value> = None;
    for v in values {
        if v.is_null() {
            continue;
        }
        min = Some(match min {
            None => v.clone(),
            Some(m) => {
                if v.total_cmp(&m) == Ordering::Less {
                    v.clone()
                } else {
                    m
                }
            }
        });
        max = Some(match max {
            None => v.clone(),
            Some(m) => {
                if v.total_cmp(&m) == Ordering::Greater {
                    v.clone()
                } else {
                    m
                }
            }
        });
    }
    let (max_val, truncated) = truncate_max(max.unwrap_or(Value::Null));
    ColumnZoneMap {
        min: min.unwrap_or(Value::Null),
        max: max_val,
        max_truncated: truncated,
    }
}

fn truncate_max(value: Value) -> (Value, bool) {
    match value {
        Value::Str(s) if s.len() > ZONE_MAP_MAX_PREFIX_BYTES => {
            let prefix: String = s.chars().take(ZONE_MAP_MAX_PREFIX_BYTES).collect();
            (Value::Str(prefix), true)
        }
        Value::Bytes(b) if b.len() > ZONE_MAP_MAX_PREFIX_BYTES => {
            (Value::Bytes(b[..ZONE_MAP_MAX_PREFIX_BYTES].to_vec()), true)
        }
        other => (other, false),
    }
}

/// `true` means `key` is provably absent from the object. A truncated max
/// can only ever say "maybe" on the upper bound, never "definitely
/// excluded".
pub fn definitely_excludes(zm: &ColumnZoneMap, key: &Value) -> bool {
    if key.total_cmp(&zm.min) == Ordering::Less {
        return true;
    }
    !zm.max_truncated && key.total_cmp(&zm.max) == Ordering::Greater
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_map_excludes_keys_outside_range() {
        let values: Vec<Value> = (1000..=2000).map(Value::I64).collect();
        let zm = build_zone_map(&values);
        assert!(definitely_excludes(&zm, &Value::I64(50)));
        assert!(definitely_excludes(&zm, &Value::I64(2100)));
        assert!(!definitely_excludes(&zm, &Value::I64(1500)));
    }

    #[test]
    fn truncated_max_never_excludes_on_the_upper_side() {
        let long = "x".repeat(ZONE_MAP_MAX_PREFIX_BYTES + 10);
        let values = vec![Value::Str("a".to_string()), Value::Str(long.clone())];
        let zm = build_zone_map(&values);
        assert!(zm.max_truncated);
        assert!(!definitely_excludes(&zm, &Value::Str(long)));
    }

    #[test]
    fn nulls_are_skipped_when_building() {
        let values = vec![Value::Null, Value::I64(5), Value::Null, Value::I64(9)];
        let zm = build_zone_map(&values);
        assert_eq!(zm.min, Value::I64(5));
        assert_eq!(zm.max, Value::I64(9));
    }
}
