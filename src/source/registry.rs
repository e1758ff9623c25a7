use std::collections::HashMap;

use log::warn;

use crate::error::{PipelineError, Result};

use super::info::{SourceInfo, SourceShape};

/// Map of `source_id -> SourceInfo` with a reverse `pad index -> source_id` map.
///
/// Not synchronized; callers serialize access through the pipeline's event thread.
pub struct SourceRegistry {
    sources: HashMap<String, SourceInfo>,
    source_id_by_pad: HashMap<u32, String>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self {
            sources: HashMap::new(),
            source_id_by_pad: HashMap::new(),
        }
    }

    /// Create (or replace) the entry of a source with a resolved shape.
    pub fn init_source(&mut self, source_id: &str, shape: SourceShape) -> &mut SourceInfo {
        if let Some(previous) = self.sources.remove(source_id) {
            warn!("source {} re-initialised; dropping previous state", source_id);
            if let Some(pad_idx) = previous.pad_idx {
                self.source_id_by_pad.remove(&pad_idx);
            }
        }
        self.sources
            .entry(source_id.to_string())
            .or_insert_with(|| SourceInfo::new(source_id, shape))
    }

    pub fn get_source(&self, source_id: &str) -> Result<&SourceInfo> {
        self.sources
            .get(source_id)
            .ok_or_else(|| PipelineError::UnknownSource(source_id.to_string()))
    }

    pub fn get_source_mut(&mut self, source_id: &str) -> Result<&mut SourceInfo> {
        self.sources
            .get_mut(source_id)
            .ok_or_else(|| PipelineError::UnknownSource(source_id.to_string()))
    }

    /// Store the source info and index its pad, if assigned.
    pub fn update_source(&mut self, source_info: SourceInfo) {
        if let Some(pad_idx) = source_info.pad_idx {
            self.source_id_by_pad
                .insert(pad_idx, source_info.source_id.clone());
        }
        self.sources
            .insert(source_info.source_id.clone(), source_info);
    }

    /// Attach a source to its multiplexer pad and mark it ready.
    pub fn attach_pad(&mut self, source_id: &str, pad_idx: u32) -> Result<()> {
        let info = self.get_source_mut(source_id)?;
        let previous = info.pad_idx.replace(pad_idx);
        info.lock.set();
        if let Some(previous) = previous {
            self.source_id_by_pad.remove(&previous);
        }
        self.source_id_by_pad
            .insert(pad_idx, source_id.to_string());
        Ok(())
    }

    pub fn remove_source(&mut self, source_id: &str) -> Result<SourceInfo> {
        let info = self
            .sources
            .remove(source_id)
            .ok_or_else(|| PipelineError::UnknownSource(source_id.to_string()))?;
        if let Some(pad_idx) = info.pad_idx {
            self.source_id_by_pad.remove(&pad_idx);
        }
        Ok(info)
    }

    pub fn get_id_by_pad_index(&self, pad_idx: u32) -> Result<&str> {
        self.source_id_by_pad
            .get(&pad_idx)
            .map(String::as_str)
            .ok_or(PipelineError::UnknownPadIndex(pad_idx))
    }

    pub fn has_sources(&self) -> bool {
        !self.sources.is_empty()
    }

    pub fn contains(&self, source_id: &str) -> bool {
        self.sources.contains_key(source_id)
    }

    /// Registered source ids, sorted.
    pub fn source_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sources.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
