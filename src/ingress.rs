//! Ingress transform: geometry bookkeeping and object metadata conversion.
//!
//! Runs once per frame before any inference stage consumes it:
//! 1. Records scale/padding transformations towards the processing shape.
//! 2. Converts externally supplied objects (source-native coordinates) into
//!    the processing object set (processing coordinates).
//! 3. Inserts exactly one primary full-frame object.
//!
//! Re-running on an already prepared frame changes nothing.

use std::collections::HashMap;

use log::{debug, warn};

use crate::frame::object::{
    primary_object_key, ObjectAttribute, ObjectId, ObjectMeta, SelectionType, SymbolMapper,
    PRIMARY_OBJECT_CONFIDENCE, PRIMARY_OBJECT_LABEL, PRIMARY_OBJECT_NAMESPACE, UNTRACKED_OBJECT_ID,
};
use crate::frame::{Frame, Transformation};
use crate::geometry::{BBox, ObjectBox};
use crate::source::SourceInfo;

/// Tolerance when deciding whether a supplied primary box is the full frame.
pub const PRIMARY_BBOX_EPS: f32 = 1e-6;

/// Apply the ingress transform to one frame.
///
/// In pass-through mode the frame keeps its native geometry, so no
/// transformations are recorded; objects are still converted.
pub fn prepare_frame(
    frame: &mut Frame,
    source: &SourceInfo,
    symbols: &mut SymbolMapper,
    pass_through: bool,
) {
    debug!(
        "preparing input for frame {} of source {} (pts {})",
        frame.id, frame.source_id, frame.pts
    );
    if !pass_through {
        add_transformations(frame, source);
    }
    if frame.objects.is_empty() && !frame.processing_objects.is_empty() {
        debug!("frame {} objects already prepared", frame.id);
        return;
    }
    convert_objects(frame, source, symbols);
}

// ----------------------------------------------------------------------------
// Transformations
// ----------------------------------------------------------------------------

fn add_transformations(frame: &mut Frame, source: &SourceInfo) {
    let target = (source.processing_width(), source.processing_height());
    let padding = padding_transformation(source);

    if target_reached(frame, target, padding.as_ref()) {
        return;
    }

    if frame.last_transformation_size() != Some(target) {
        let scale = Transformation::Scale {
            width: target.0,
            height: target.1,
        };
        debug!(
            "adding {:?} to frame {} of source {}",
            scale, frame.id, frame.source_id
        );
        frame.add_transformation(scale);
    }
    if let Some(padding) = padding {
        debug!(
            "adding {:?} to frame {} of source {}",
            padding, frame.id, frame.source_id
        );
        frame.add_transformation(padding);
    }
}

fn padding_transformation(source: &SourceInfo) -> Option<Transformation> {
    source
        .padding()
        .filter(|padding| padding.keep)
        .map(|padding| Transformation::Padding {
            left: padding.left,
            top: padding.top,
            right: padding.right,
            bottom: padding.bottom,
        })
}

/// True when the frame already ends with the scale (and kept padding) this
/// source would add.
fn target_reached(frame: &Frame, target: (u32, u32), padding: Option<&Transformation>) -> bool {
    let mut tail = frame.transformations.iter().rev();
    match padding {
        Some(expected) => {
            tail.next() == Some(expected)
                && tail.next().and_then(Transformation::size) == Some(target)
        }
        None => tail.next().and_then(Transformation::size) == Some(target),
    }
}

// ----------------------------------------------------------------------------
// Objects
// ----------------------------------------------------------------------------

fn convert_objects(frame: &mut Frame, source: &SourceInfo, symbols: &mut SymbolMapper) {
    let native = source.src_resolution.unwrap_or_else(|| frame.resolution());
    let scale_x = source.processing_width() as f32 / native.width as f32;
    let scale_y = source.processing_height() as f32 / native.height as f32;
    let offset = source
        .padding()
        .map(|padding| (padding.left as f32, padding.top as f32));

    let mut primary_bbox = BBox::full_frame(source.processing_width(), source.processing_height());
    let mut primary_id: Option<ObjectId> = None;
    let mut built: Vec<ObjectMeta> = Vec::with_capacity(frame.objects.len() + 1);
    // Children may precede their parents; parents are linked in a second pass.
    let mut index_by_id: HashMap<ObjectId, usize> = HashMap::new();

    for obj in &frame.objects {
        let mut bbox = obj.detection_box.normalized();

        if obj.is_primary() {
            primary_id = Some(obj.id);
            let candidate = match bbox {
                ObjectBox::Regular(bbox) => bbox,
                ObjectBox::Rotated(rbbox) => rbbox.as_bbox(),
            };
            if !candidate.almost_eq(&primary_bbox, PRIMARY_BBOX_EPS) {
                primary_bbox = candidate;
                primary_bbox.scale(scale_x, scale_y);
                debug!(
                    "corrected primary bbox for frame {}: {:?}",
                    frame.id, primary_bbox
                );
            }
            continue;
        }

        let (model_uid, class_id) = symbols.object_id(&obj.namespace, &obj.label);
        let selection_type = if bbox.is_rotated() {
            SelectionType::RotatedBbox
        } else {
            SelectionType::RegularBbox
        };
        bbox.scale(scale_x, scale_y);
        if let Some((dx, dy)) = offset {
            bbox.shift(dx, dy);
        }

        let mut attributes = Vec::with_capacity(obj.attributes.len());
        for attr in &obj.attributes {
            match attr.values.first() {
                Some(value) => attributes.push(ObjectAttribute {
                    element_name: attr.namespace.clone(),
                    name: attr.name.clone(),
                    value: value.value.clone(),
                    confidence: value.confidence,
                }),
                None => debug!(
                    "attribute {}/{} of object {} has no values",
                    attr.namespace, attr.name, obj.id
                ),
            }
        }

        index_by_id.insert(obj.id, built.len());
        built.push(ObjectMeta {
            label: obj.key(),
            model_uid,
            class_id,
            selection_type,
            bbox,
            confidence: obj.confidence,
            track_id: obj.track_id.unwrap_or(UNTRACKED_OBJECT_ID),
            attributes,
            parent: None,
            source_object: Some(obj.id),
        });
    }

    if let Some((dx, dy)) = offset {
        primary_bbox.shift(dx, dy);
    }
    let primary_index = built.len();
    let (model_uid, class_id) = symbols.object_id(PRIMARY_OBJECT_NAMESPACE, PRIMARY_OBJECT_LABEL);
    debug!(
        "adding primary object to frame {}: {:?}",
        frame.id, primary_bbox
    );
    built.push(ObjectMeta {
        label: primary_object_key(),
        model_uid,
        class_id,
        selection_type: SelectionType::RegularBbox,
        bbox: ObjectBox::Regular(primary_bbox),
        confidence: PRIMARY_OBJECT_CONFIDENCE,
        track_id: UNTRACKED_OBJECT_ID,
        attributes: Vec::new(),
        parent: None,
        source_object: None,
    });

    for obj in &frame.objects {
        let Some(parent_id) = obj.parent_id else {
            continue;
        };
        let Some(&child) = index_by_id.get(&obj.id) else {
            continue;
        };
        let parent = if primary_id == Some(parent_id) {
            Some(primary_index)
        } else {
            index_by_id.get(&parent_id).copied()
        };
        if parent.is_none() {
            warn!(
                "object {} of frame {} references missing parent {}",
                obj.id, frame.id, parent_id
            );
        }
        built[child].parent = parent;
    }

    frame.objects.clear();
    frame.processing_objects = built;
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::object::{Attribute, AttributeValue, AttributeValueKind, VideoObject};
    use crate::geometry::{FramePadding, RBBox, Resolution};
    use crate::source::SourceShape;

    fn source(padding: Option<FramePadding>) -> SourceInfo {
        let mut shape = SourceShape::new(960, 540);
        shape.padding = padding;
        let mut info = SourceInfo::new("cam-1", shape);
        info.src_resolution = Some(Resolution {
            width: 1920,
            height: 1080,
        });
        info
    }

    fn kept_padding() -> FramePadding {
        FramePadding {
            keep: true,
            left: 16,
            top: 8,
            right: 16,
            bottom: 8,
        }
    }

    fn regular(xc: f32, yc: f32, w: f32, h: f32) -> ObjectBox {
        ObjectBox::Regular(BBox::new(xc, yc, w, h))
    }

    #[test]
    fn frame_without_objects_gets_primary() {
        let mut frame = Frame::new("cam-1", 0, 1920, 1080);
        let mut symbols = SymbolMapper::new();
        prepare_frame(&mut frame, &source(None), &mut symbols, false);

        assert_eq!(frame.processing_objects.len(), 1);
        let primary = frame.primary_object().cloned();
        assert_eq!(
            primary.map(|p| p.bbox),
            Some(regular(480.0, 270.0, 960.0, 540.0))
        );
    }

    #[test]
    fn retry_does_not_duplicate_scale() {
        let mut frame = Frame::new("cam-1", 0, 1920, 1080);
        let mut symbols = SymbolMapper::new();
        let info = source(None);
        prepare_frame(&mut frame, &info, &mut symbols, false);
        prepare_frame(&mut frame, &info, &mut symbols, false);

        assert_eq!(
            frame.transformations,
            vec![
                Transformation::InitialSize {
                    width: 1920,
                    height: 1080
                },
                Transformation::Scale {
                    width: 960,
                    height: 540
                },
            ]
        );
        assert_eq!(frame.processing_objects.len(), 1);
    }

    #[test]
    fn retry_with_kept_padding_is_a_noop() {
        let mut frame = Frame::new("cam-1", 0, 1920, 1080);
        let mut symbols = SymbolMapper::new();
        let info = source(Some(kept_padding()));
        prepare_frame(&mut frame, &info, &mut symbols, false);
        let once = frame.transformations.clone();
        prepare_frame(&mut frame, &info, &mut symbols, false);

        assert_eq!(frame.transformations, once);
        assert_eq!(once.len(), 3);
        assert!(matches!(once[2], Transformation::Padding { left: 16, .. }));
    }

    #[test]
    fn native_size_source_adds_no_scale() {
        let mut frame = Frame::new("cam-1", 0, 960, 540);
        let mut symbols = SymbolMapper::new();
        let mut info = source(None);
        info.src_resolution = None;
        prepare_frame(&mut frame, &info, &mut symbols, false);
        assert_eq!(frame.transformations.len(), 1);
    }

    #[test]
    fn pass_through_records_no_transformations() {
        let mut frame = Frame::new("cam-1", 0, 1920, 1080);
        let mut symbols = SymbolMapper::new();
        prepare_frame(&mut frame, &source(None), &mut symbols, true);
        assert_eq!(frame.transformations.len(), 1);
        assert_eq!(frame.processing_objects.len(), 1);
    }

    #[test]
    fn objects_are_scaled_offset_and_tracked() {
        let person = VideoObject::new(7, "yolo", "person", regular(200.0, 100.0, 40.0, 80.0))
            .with_confidence(0.8)
            .with_attribute(Attribute::new(
                "age",
                "years",
                vec![AttributeValue::new(AttributeValueKind::Integer(31), Some(0.6))],
            ))
            .with_attribute(Attribute::new("age", "empty", vec![]));
        let car = VideoObject::new(8, "yolo", "car", regular(1000.0, 500.0, 200.0, 100.0))
            .with_track_id(42);
        let mut frame = Frame::new("cam-1", 0, 1920, 1080)
            .with_object(person)
            .with_object(car);
        let mut symbols = SymbolMapper::new();
        prepare_frame(&mut frame, &source(Some(kept_padding())), &mut symbols, false);

        assert!(frame.objects.is_empty());
        assert_eq!(frame.processing_objects.len(), 3);

        let person = &frame.processing_objects[0];
        assert_eq!(person.label, "yolo.person");
        assert_eq!(person.bbox, regular(116.0, 58.0, 20.0, 40.0));
        assert_eq!(person.track_id, UNTRACKED_OBJECT_ID);
        assert_eq!(person.attributes.len(), 1);
        assert_eq!(person.attributes[0].value, AttributeValueKind::Integer(31));
        assert_eq!((person.model_uid, person.class_id), (1, 0));

        let car = &frame.processing_objects[1];
        assert_eq!(car.track_id, 42);
        assert_eq!((car.model_uid, car.class_id), (1, 1));

        let primary = &frame.processing_objects[2];
        assert!(primary.is_primary());
        assert_eq!(primary.bbox, regular(496.0, 278.0, 960.0, 540.0));
        assert_eq!(primary.confidence, PRIMARY_OBJECT_CONFIDENCE);
    }

    #[test]
    fn supplied_primary_corrects_full_frame_box() {
        let primary = VideoObject::new(
            1,
            PRIMARY_OBJECT_NAMESPACE,
            PRIMARY_OBJECT_LABEL,
            regular(400.0, 300.0, 800.0, 600.0),
        );
        let mut frame = Frame::new("cam-1", 0, 1920, 1080).with_object(primary);
        let mut symbols = SymbolMapper::new();
        prepare_frame(&mut frame, &source(None), &mut symbols, false);

        assert_eq!(frame.processing_objects.len(), 1);
        assert_eq!(
            frame.primary_object().map(|p| p.bbox),
            Some(regular(200.0, 150.0, 400.0, 300.0))
        );
    }

    #[test]
    fn full_frame_primary_is_not_a_correction() {
        let primary = VideoObject::new(
            1,
            PRIMARY_OBJECT_NAMESPACE,
            PRIMARY_OBJECT_LABEL,
            regular(480.0, 270.0, 960.0, 540.0),
        );
        let mut frame = Frame::new("cam-1", 0, 1920, 1080).with_object(primary);
        let mut symbols = SymbolMapper::new();
        prepare_frame(&mut frame, &source(None), &mut symbols, false);
        assert_eq!(
            frame.primary_object().map(|p| p.bbox),
            Some(regular(480.0, 270.0, 960.0, 540.0))
        );
    }

    #[test]
    fn parents_resolve_regardless_of_order() {
        let bbox = regular(100.0, 100.0, 10.0, 10.0);
        let primary = VideoObject::new(1, PRIMARY_OBJECT_NAMESPACE, PRIMARY_OBJECT_LABEL, bbox);
        let plate = VideoObject::new(3, "lpr", "plate", bbox).with_parent(2);
        let car = VideoObject::new(2, "yolo", "car", bbox).with_parent(1);
        let orphan = VideoObject::new(4, "yolo", "wheel", bbox).with_parent(99);
        let mut frame = Frame::new("cam-1", 0, 1920, 1080)
            .with_object(plate)
            .with_object(primary)
            .with_object(car)
            .with_object(orphan);
        let mut symbols = SymbolMapper::new();
        prepare_frame(&mut frame, &source(None), &mut symbols, false);

        let objects = &frame.processing_objects;
        assert_eq!(objects.len(), 4);
        assert_eq!(objects[0].label, "lpr.plate");
        assert_eq!(objects[0].parent, Some(1));
        assert_eq!(objects[1].label, "yolo.car");
        assert_eq!(objects[1].parent, Some(3));
        assert!(objects[3].is_primary());
        assert_eq!(objects[2].parent, None);
    }

    #[test]
    fn unrotated_boxes_become_regular() {
        let rbox = ObjectBox::Rotated(RBBox::new(100.0, 100.0, 10.0, 10.0, None));
        let tilted = ObjectBox::Rotated(RBBox::new(100.0, 100.0, 10.0, 10.0, Some(45.0)));
        let mut frame = Frame::new("cam-1", 0, 1920, 1080)
            .with_object(VideoObject::new(1, "det", "a", rbox))
            .with_object(VideoObject::new(2, "det", "b", tilted));
        let mut symbols = SymbolMapper::new();
        prepare_frame(&mut frame, &source(None), &mut symbols, false);

        assert_eq!(
            frame.processing_objects[0].selection_type,
            SelectionType::RegularBbox
        );
        assert_eq!(
            frame.processing_objects[1].selection_type,
            SelectionType::RotatedBbox
        );
    }
}
