use ahash::AHashMap;
use serde::{Deserialize, Serialize};

pub type TagId = u32;

/// Declared data type of a tag, independent of the protocol encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    Boolean,
    Word,
    Uword,
    Dword,
    Udword,
    Float,
}

/// A typed tag value as returned to (or supplied by) an app node.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "UPPERCASE")]
pub enum Value {
    Boolean(bool),
    Word(i16),
    Uword(u16),
    Dword(i32),
    Udword(u32),
    Float(f32),
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Boolean(_) => DataType::Boolean,
            Value::Word(_) => DataType::Word,
            Value::Uword(_) => DataType::Uword,
            Value::Dword(_) => DataType::Dword,
            Value::Udword(_) => DataType::Udword,
            Value::Float(_) => DataType::Float,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DataTag {
    pub id: TagId,
    pub name: String,
    pub address: String,
    pub data_type: DataType,
}

/// Shared read-only tag registry, owned by the platform. Drivers look tags
/// up by id and never mutate the table.
#[derive(Debug, Default)]
pub struct TagTable {
    tags: AHashMap<TagId, DataTag>,
}

impl TagTable {
    pub fn from_tags(tags: impl IntoIterator<Item = DataTag>) -> Self {
        let mut table = AHashMap::new();
        for tag in tags {
            if let Some(prev) = table.insert(tag.id, tag) {
                log::warn!("Tag id {} registered more than once", prev.id);
            }
        }
        TagTable { tags: table }
    }

    pub fn get(&self, id: TagId) -> Option<&DataTag> {
        self.tags.get(&id)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

/// A named, ordered set of tags polled and reported together.
///
/// Tag ids are unique within a group; insertion order is preserved so that
/// batched responses line up with the request.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct GroupConfig {
    pub name: String,
    pub interval_ms: u32,
    tag_ids: Vec<TagId>,
}

impl GroupConfig {
    pub fn new(name: impl Into<String>, interval_ms: u32) -> Self {
        GroupConfig {
            name: name.into(),
            interval_ms,
            tag_ids: Vec::new(),
        }
    }

    /// Returns false (and leaves the group unchanged) if the id is already
    /// a member.
    pub fn push_tag(&mut self, id: TagId) -> bool {
        if self.tag_ids.contains(&id) {
            return false;
        }
        self.tag_ids.push(id);
        true
    }

    pub fn tag_ids(&self) -> &[TagId] {
        &self.tag_ids
    }

    /// Drop duplicate ids, keeping the first occurrence of each.
    pub fn dedup_tags(&mut self) {
        let mut seen = Vec::with_capacity(self.tag_ids.len());
        self.tag_ids.retain(|id| {
            if seen.contains(id) {
                false
            } else {
                seen.push(*id);
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_tags_stay_unique_and_ordered() {
        let mut grp = GroupConfig::new("meters", 1000);
        assert!(grp.push_tag(3));
        assert!(grp.push_tag(1));
        assert!(grp.push_tag(2));
        assert!(!grp.push_tag(1));
        assert_eq!(grp.tag_ids(), &[3, 1, 2]);
    }

    #[test]
    fn value_serialization_shape() {
        let v = Value::Uword(0x1234);
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json, serde_json::json!({"type": "UWORD", "value": 0x1234}));
    }
}
