// In-memory map connector with JSON keys and values

use async_trait::async_trait;
use std::sync::Arc;

use super::projector::{Payload, RowProjector};
use super::{
    declared_side_fields, json, option_or, side_table_fields, EntryMetadata, MetadataResolver,
    QueryTargetDescriptor, UpsertTargetDescriptor, OPTION_MAP_NAME,
};
use crate::api::middleware::AppError;
use crate::engine::{MapEntry, MapStore, SinkProcessor, SourcePoll, SourceProcessor};
use crate::models::{MappingField, MappingOptions, Row, TableField, KEY, VALUE};

pub struct MapJsonResolver {
    maps: Arc<MapStore>,
}

impl MapJsonResolver {
    pub fn new(maps: Arc<MapStore>) -> Self {
        Self { maps }
    }
}

fn side_name(is_key: bool) -> &'static str {
    if is_key {
        "key"
    } else {
        "value"
    }
}

impl MetadataResolver for MapJsonResolver {
    fn resolve_fields(
        &self,
        is_key: bool,
        user_fields: &[MappingField],
        options: &MappingOptions,
        mapping_name: &str,
    ) -> Result<Vec<MappingField>, AppError> {
        let fields = if user_fields.is_empty() {
            let map_name = option_or(options, OPTION_MAP_NAME, mapping_name);
            let entry = self
                .maps
                .first_entry(map_name)
                .ok_or_else(|| AppError::Resolution(format!("No data found in '{}'", map_name)))?;
            let (sample, prefix) = if is_key {
                (&entry.key, KEY)
            } else {
                (&entry.value, VALUE)
            };
            tracing::debug!("Sampled {} of map {}", side_name(is_key), map_name);
            json::infer_fields(sample, Some(prefix))?
        } else {
            declared_side_fields(is_key, user_fields)?
        };

        if fields.is_empty() {
            return Err(AppError::Validation(format!("Empty {} column list", side_name(is_key))));
        }
        Ok(fields)
    }

    fn resolve_metadata(
        &self,
        is_key: bool,
        fields: &[MappingField],
        _options: &MappingOptions,
    ) -> Result<EntryMetadata, AppError> {
        Ok(EntryMetadata {
            fields: side_table_fields(is_key, fields)?,
            query_target: QueryTargetDescriptor::Json,
            upsert_target: UpsertTargetDescriptor::Json,
        })
    }
}

/// Reads a point-in-time copy of the map taken when the job starts
pub struct MapSource {
    entries: std::vec::IntoIter<MapEntry>,
    projector: RowProjector,
}

impl MapSource {
    pub fn open(maps: &MapStore, map_name: &str, projector: RowProjector) -> Self {
        Self {
            entries: maps.entries(map_name).into_iter(),
            projector,
        }
    }
}

impl SourceProcessor for MapSource {
    fn poll(&mut self) -> Result<SourcePoll, AppError> {
        for entry in self.entries.by_ref() {
            let row = self
                .projector
                .project(&Payload::Json(&entry.key), &Payload::Json(&entry.value))?;
            if let Some(row) = row {
                return Ok(SourcePoll::Row(row));
            }
        }
        Ok(SourcePoll::Done)
    }
}

pub struct MapSink {
    maps: Arc<MapStore>,
    map_name: String,
    fields: Vec<TableField>,
}

impl MapSink {
    pub fn new(maps: Arc<MapStore>, map_name: &str, fields: Vec<TableField>) -> Self {
        Self {
            maps,
            map_name: map_name.to_string(),
            fields,
        }
    }
}

#[async_trait]
impl SinkProcessor for MapSink {
    async fn write(&mut self, row: Row) -> Result<(), AppError> {
        let (key, value): (Vec<_>, Vec<_>) = self
            .fields
            .iter()
            .zip(row.iter())
            .partition(|(field, _)| field.is_key());
        if key.iter().all(|(_, v)| v.is_null()) {
            return Err(AppError::Validation(format!(
                "Cannot write NULL key to map {}",
                self.map_name
            )));
        }
        self.maps
            .put(&self.map_name, json::to_object(key), json::to_object(value));
        Ok(())
    }

    async fn complete(&mut self, _outcome: &Result<(), AppError>) -> Result<(), AppError> {
        Ok(())
    }
}
