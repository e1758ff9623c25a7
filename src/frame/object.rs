//! Object metadata: externally supplied annotations and the internal
//! processing-space object set.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::geometry::ObjectBox;

/// Namespace of the synthetic full-frame object.
pub const PRIMARY_OBJECT_NAMESPACE: &str = "auto";
/// Label of the synthetic full-frame object.
pub const PRIMARY_OBJECT_LABEL: &str = "frame";
/// Track id of objects the tracker has not picked up.
pub const UNTRACKED_OBJECT_ID: i64 = i64::MAX;
/// Confidence of the primary object. Kept above the tracker's minimum detector
/// confidence so the tracker never drops it.
pub const PRIMARY_OBJECT_CONFIDENCE: f32 = 0.999;

/// Identifier of an externally supplied object, unique within its frame.
pub type ObjectId = u64;

pub fn object_key(namespace: &str, label: &str) -> String {
    format!("{namespace}.{label}")
}

pub fn primary_object_key() -> String {
    object_key(PRIMARY_OBJECT_NAMESPACE, PRIMARY_OBJECT_LABEL)
}

// ----------------------------------------------------------------------------
// Attributes
// ----------------------------------------------------------------------------

/// Closed set of attribute value types.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttributeValueKind {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    IntegerList(Vec<i64>),
    FloatList(Vec<f64>),
    StringList(Vec<String>),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttributeValue {
    pub value: AttributeValueKind,
    pub confidence: Option<f32>,
}

impl AttributeValue {
    pub fn new(value: AttributeValueKind, confidence: Option<f32>) -> Self {
        Self { value, confidence }
    }
}

/// Attribute attached to an external object, keyed by namespace + name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub namespace: String,
    pub name: String,
    pub values: Vec<AttributeValue>,
}

impl Attribute {
    pub fn new(namespace: &str, name: &str, values: Vec<AttributeValue>) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            values,
        }
    }
}

// ----------------------------------------------------------------------------
// External objects (source-native coordinates)
// ----------------------------------------------------------------------------

/// Object annotation supplied with the frame, in source-native coordinates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VideoObject {
    pub id: ObjectId,
    pub namespace: String,
    pub label: String,
    pub detection_box: ObjectBox,
    pub confidence: f32,
    pub track_id: Option<i64>,
    pub attributes: Vec<Attribute>,
    pub parent_id: Option<ObjectId>,
}

impl VideoObject {
    pub fn new(id: ObjectId, namespace: &str, label: &str, detection_box: ObjectBox) -> Self {
        Self {
            id,
            namespace: namespace.to_string(),
            label: label.to_string(),
            detection_box,
            confidence: 1.0,
            track_id: None,
            attributes: Vec::new(),
            parent_id: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_track_id(mut self, track_id: i64) -> Self {
        self.track_id = Some(track_id);
        self
    }

    pub fn with_parent(mut self, parent_id: ObjectId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn key(&self) -> String {
        object_key(&self.namespace, &self.label)
    }

    pub fn is_primary(&self) -> bool {
        self.namespace == PRIMARY_OBJECT_NAMESPACE && self.label == PRIMARY_OBJECT_LABEL
    }
}

// ----------------------------------------------------------------------------
// Internal objects (processing coordinates)
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionType {
    RegularBbox,
    RotatedBbox,
}

/// Single attribute value carried into the processing object set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectAttribute {
    pub element_name: String,
    pub name: String,
    pub value: AttributeValueKind,
    pub confidence: Option<f32>,
}

/// Object in processing coordinates, as consumed by inference and tracking.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub label: String,
    pub model_uid: u32,
    pub class_id: u32,
    pub selection_type: SelectionType,
    pub bbox: ObjectBox,
    pub confidence: f32,
    pub track_id: i64,
    pub attributes: Vec<ObjectAttribute>,
    /// Index of the parent within the same frame's object set.
    pub parent: Option<usize>,
    /// External object this one was built from; `None` for the primary object.
    pub source_object: Option<ObjectId>,
}

impl ObjectMeta {
    pub fn is_primary(&self) -> bool {
        self.label == primary_object_key()
    }
}

// ----------------------------------------------------------------------------
// Symbol mapper
// ----------------------------------------------------------------------------

/// Assigns stable `(model_uid, class_id)` pairs to `namespace.label` keys.
///
/// The primary object is registered first and always maps to `(0, 0)`.
#[derive(Debug)]
pub struct SymbolMapper {
    models: HashMap<String, ModelSymbols>,
}

#[derive(Debug)]
struct ModelSymbols {
    uid: u32,
    labels: HashMap<String, u32>,
}

impl SymbolMapper {
    pub fn new() -> Self {
        let mut mapper = Self {
            models: HashMap::new(),
        };
        mapper.object_id(PRIMARY_OBJECT_NAMESPACE, PRIMARY_OBJECT_LABEL);
        mapper
    }

    /// Look up or register the ids of `namespace.label`.
    pub fn object_id(&mut self, namespace: &str, label: &str) -> (u32, u32) {
        let next_uid = self.models.len() as u32;
        let model = self
            .models
            .entry(namespace.to_string())
            .or_insert_with(|| ModelSymbols {
                uid: next_uid,
                labels: HashMap::new(),
            });
        let next_class = model.labels.len() as u32;
        let class_id = *model.labels.entry(label.to_string()).or_insert(next_class);
        (model.uid, class_id)
    }

    /// Ids of an already registered key.
    pub fn lookup(&self, namespace: &str, label: &str) -> Option<(u32, u32)> {
        let model = self.models.get(namespace)?;
        model.labels.get(label).map(|class_id| (model.uid, *class_id))
    }
}

impl Default for SymbolMapper {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BBox;

    #[test]
    fn primary_object_maps_to_zero() {
        let mapper = SymbolMapper::new();
        assert_eq!(
            mapper.lookup(PRIMARY_OBJECT_NAMESPACE, PRIMARY_OBJECT_LABEL),
            Some((0, 0))
        );
    }

    #[test]
    fn symbol_ids_are_stable() {
        let mut mapper = SymbolMapper::new();
        let person = mapper.object_id("yolo", "person");
        let car = mapper.object_id("yolo", "car");
        let plate = mapper.object_id("lpr", "plate");
        assert_eq!(person, (1, 0));
        assert_eq!(car, (1, 1));
        assert_eq!(plate, (2, 0));
        assert_eq!(mapper.object_id("yolo", "person"), person);
        assert_eq!(mapper.lookup("lpr", "missing"), None);
    }

    #[test]
    fn primary_detection_by_key() {
        let bbox = ObjectBox::Regular(BBox::new(1.0, 1.0, 2.0, 2.0));
        let primary = VideoObject::new(1, PRIMARY_OBJECT_NAMESPACE, PRIMARY_OBJECT_LABEL, bbox);
        let other = VideoObject::new(2, "yolo", "frame", bbox);
        assert!(primary.is_primary());
        assert!(!other.is_primary());
        assert_eq!(primary.key(), "auto.frame");
    }

    #[test]
    fn attribute_values_serialize_tagged() -> anyhow::Result<()> {
        let value = AttributeValue::new(AttributeValueKind::IntegerList(vec![1, 2]), Some(0.5));
        let json = serde_json::to_value(&value)?;
        assert_eq!(json["value"]["type"], "integer_list");
        assert_eq!(json["value"]["value"][1], 2);
        Ok(())
    }
}
