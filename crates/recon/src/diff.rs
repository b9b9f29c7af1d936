// Field-level diff between a former and a fresh field map.
// Pure function: two maps in, added/changed/removed fields out.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::record::FieldMap;

/// Former and fresh value of a field present on both sides.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueChange {
    pub old: Value,
    pub new: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FieldDiff {
    /// Present only in the fresh map, with the fresh value.
    pub added: FieldMap,
    /// Present in both with unequal values.
    pub changed: BTreeMap<String, ValueChange>,
    /// Present only in the former map, with the former value.
    pub removed: FieldMap,
}

impl FieldDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

/// Compare two field maps. Equality is deep (`serde_json::Value: PartialEq`).
pub fn diff_fields(former: &FieldMap, fresh: &FieldMap) -> FieldDiff {
    let mut diff = FieldDiff::default();

    for (key, value) in fresh {
        if !former.contains_key(key) {
            diff.added.insert(key.clone(), value.clone());
        }
    }

    for (key, old) in former {
        match fresh.get(key) {
            None => {
                diff.removed.insert(key.clone(), old.clone());
            }
            Some(new) if new != old => {
                diff.changed.insert(
                    key.clone(),
                    ValueChange {
                        old: old.clone(),
                        new: new.clone(),
                    },
                );
            }
            Some(_) => {}
        }
    }

    diff
}
