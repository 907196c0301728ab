use crate::foundation::error::{MaskfxError, MaskfxResult};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Maps duplicate tracker ids onto one canonical id.
///
/// Chains (`3 -> 2 -> 1`) resolve to their end; cycles are rejected at construction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IdMergeTable {
    map: HashMap<u32, u32>,
}

impl IdMergeTable {
    /// Table that maps every id onto itself.
    pub fn identity() -> Self {
        Self::default()
    }

    /// Build from `(duplicate, canonical)` pairs.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (u32, u32)>) -> MaskfxResult<Self> {
        let mut direct: HashMap<u32, u32> = HashMap::new();
        for (dup, canon) in pairs {
            if dup == canon {
                continue;
            }
            if let Some(prev) = direct.insert(dup, canon)
                && prev != canon
            {
                return Err(MaskfxError::validation(format!(
                    "object id {dup} is merged into both {prev} and {canon}"
                )));
            }
        }

        let mut map = HashMap::with_capacity(direct.len());
        for &start in direct.keys() {
            let mut seen = vec![start];
            let mut cur = direct[&start];
            while let Some(&next) = direct.get(&cur) {
                if seen.contains(&cur) {
                    return Err(MaskfxError::validation(format!(
                        "id merge table has a cycle through object id {cur}"
                    )));
                }
                seen.push(cur);
                cur = next;
            }
            if cur == start {
                return Err(MaskfxError::validation(format!(
                    "id merge table has a cycle through object id {start}"
                )));
            }
            map.insert(start, cur);
        }
        Ok(Self { map })
    }

    /// Parse a `{"<duplicate id>": <canonical id>}` JSON object.
    pub fn from_reader<R: std::io::Read>(r: R) -> MaskfxResult<Self> {
        let raw: BTreeMap<String, u32> = serde_json::from_reader(r)
            .map_err(|e| MaskfxError::serde(format!("parse id merge JSON: {e}")))?;
        let pairs = raw
            .into_iter()
            .map(|(k, v)| {
                k.trim().parse::<u32>().map(|dup| (dup, v)).map_err(|_| {
                    MaskfxError::validation(format!("id merge key '{k}' is not an object id"))
                })
            })
            .collect::<MaskfxResult<Vec<_>>>()?;
        Self::from_pairs(pairs)
    }

    /// Parse a merge table from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> MaskfxResult<Self> {
        let path = path.as_ref();
        let f = File::open(path).map_err(|e| {
            MaskfxError::input(format!("open id merge JSON '{}': {e}", path.display()))
        })?;
        Self::from_reader(BufReader::new(f))
    }

    /// Combine with another table; conflicting or cyclic entries are rejected.
    pub fn merged(&self, other: &IdMergeTable) -> MaskfxResult<Self> {
        Self::from_pairs(self.map.iter().chain(other.map.iter()).map(|(a, b)| (*a, *b)))
    }

    /// Canonical id of `id`.
    pub fn canonical(&self, id: u32) -> u32 {
        self.map.get(&id).copied().unwrap_or(id)
    }

    /// Number of merged ids.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Return `true` when no id is merged.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/masks/merge.rs"]
mod tests;
