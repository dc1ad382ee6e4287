// Topic Connector
//
// Records live in the node's topic store. Keys and values are encoded either
// as JSON documents or as Avro datums of the schema generated from the
// mapping's fields. Topics have no sample to infer from, so columns must be
// declared.

use apache_avro::{from_avro_datum, to_avro_datum, Schema};
use async_trait::async_trait;
use std::sync::Arc;

use super::projector::{Payload, RowProjector};
use super::{
    avro, declared_side_fields, json, side_table_fields, EntryMetadata, MetadataResolver,
    QueryTargetDescriptor, UpsertTargetDescriptor,
};
use crate::api::middleware::AppError;
use crate::engine::{SinkProcessor, SourcePoll, SourceProcessor, TopicRecord, TopicStore};
use crate::models::{MappingField, MappingOptions, Row, TableField};

fn declared_fields(is_key: bool, user_fields: &[MappingField], mapping_name: &str) -> Result<Vec<MappingField>, AppError> {
    if user_fields.is_empty() {
        return Err(AppError::Validation(format!(
            "Column list is required for kafka mapping {}",
            mapping_name
        )));
    }
    let fields = declared_side_fields(is_key, user_fields)?;
    if !is_key && fields.is_empty() {
        return Err(AppError::Validation("Empty value column list".to_string()));
    }
    Ok(fields)
}

pub struct KafkaJsonResolver;

impl MetadataResolver for KafkaJsonResolver {
    fn resolve_fields(
        &self,
        is_key: bool,
        user_fields: &[MappingField],
        _options: &MappingOptions,
        mapping_name: &str,
    ) -> Result<Vec<MappingField>, AppError> {
        declared_fields(is_key, user_fields, mapping_name)
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

pub struct KafkaAvroResolver;

impl MetadataResolver for KafkaAvroResolver {
    fn resolve_fields(
        &self,
        is_key: bool,
        user_fields: &[MappingField],
        _options: &MappingOptions,
        mapping_name: &str,
    ) -> Result<Vec<MappingField>, AppError> {
        declared_fields(is_key, user_fields, mapping_name)
    }

    fn resolve_metadata(
        &self,
        is_key: bool,
        fields: &[MappingField],
        _options: &MappingOptions,
    ) -> Result<EntryMetadata, AppError> {
        let fields = side_table_fields(is_key, fields)?;
        let schema = avro::write_schema(&fields);
        Ok(EntryMetadata {
            fields,
            query_target: QueryTargetDescriptor::Avro,
            upsert_target: UpsertTargetDescriptor::Avro { schema },
        })
    }
}

enum Codec {
    Json,
    Avro {
        key_schema: Option<Arc<Schema>>,
        value_schema: Arc<Schema>,
    },
}

impl Codec {
    fn avro(key_schema: Option<&str>, value_schema: &str) -> Result<Self, AppError> {
        Ok(Codec::Avro {
            key_schema: key_schema.map(avro::parse_schema).transpose()?,
            value_schema: avro::parse_schema(value_schema)?,
        })
    }
}

/// Tails a topic from offset 0. Reports `Idle` once caught up.
pub struct TopicSource {
    topics: Arc<TopicStore>,
    topic: String,
    offset: u64,
    codec: Codec,
    projector: RowProjector,
}

impl TopicSource {
    pub fn json(topics: Arc<TopicStore>, topic: &str, projector: RowProjector) -> Self {
        Self {
            topics,
            topic: topic.to_string(),
            offset: 0,
            codec: Codec::Json,
            projector,
        }
    }

    pub fn avro(
        topics: Arc<TopicStore>,
        topic: &str,
        key_schema: Option<&str>,
        value_schema: &str,
        projector: RowProjector,
    ) -> Result<Self, AppError> {
        Ok(Self {
            topics,
            topic: topic.to_string(),
            offset: 0,
            codec: Codec::avro(key_schema, value_schema)?,
            projector,
        })
    }

    fn project(&self, record: &TopicRecord) -> Result<Option<Row>, AppError> {
        match &self.codec {
            Codec::Json => {
                let key = record
                    .key
                    .as_deref()
                    .map(serde_json::from_slice::<serde_json::Value>)
                    .transpose()?;
                let value: serde_json::Value = serde_json::from_slice(&record.value)?;
                let key = key.as_ref().map(Payload::Json).unwrap_or(Payload::Absent);
                self.projector.project(&key, &Payload::Json(&value))
            }
            Codec::Avro {
                key_schema,
                value_schema,
            } => {
                let key = match (key_schema, &record.key) {
                    (Some(schema), Some(bytes)) => Some(from_avro_datum(schema, &mut &bytes[..], None)?),
                    _ => None,
                };
                let value = from_avro_datum(value_schema, &mut &record.value[..], None)?;
                let key = key.as_ref().map(Payload::Avro).unwrap_or(Payload::Absent);
                self.projector.project(&key, &Payload::Avro(&value))
            }
        }
    }
}

impl SourceProcessor for TopicSource {
    fn poll(&mut self) -> Result<SourcePoll, AppError> {
        while let Some(record) = self.topics.read(&self.topic, self.offset) {
            self.offset += 1;
            if let Some(row) = self.project(&record)? {
                return Ok(SourcePoll::Row(row));
            }
        }
        Ok(SourcePoll::Idle)
    }
}

pub struct TopicSink {
    topics: Arc<TopicStore>,
    topic: String,
    codec: Codec,
    fields: Vec<TableField>,
}

impl TopicSink {
    pub fn json(topics: Arc<TopicStore>, topic: &str, fields: Vec<TableField>) -> Self {
        Self {
            topics,
            topic: topic.to_string(),
            codec: Codec::Json,
            fields,
        }
    }

    pub fn avro(
        topics: Arc<TopicStore>,
        topic: &str,
        key_schema: Option<&str>,
        value_schema: &str,
        fields: Vec<TableField>,
    ) -> Result<Self, AppError> {
        Ok(Self {
            topics,
            topic: topic.to_string(),
            codec: Codec::avro(key_schema, value_schema)?,
            fields,
        })
    }

    fn encode(&self, row: &Row) -> Result<TopicRecord, AppError> {
        let (key, value): (Vec<_>, Vec<_>) = self
            .fields
            .iter()
            .zip(row.iter())
            .partition(|(field, _)| field.is_key());
        let has_key = !key.is_empty();

        match &self.codec {
            Codec::Json => Ok(TopicRecord {
                key: if has_key {
                    Some(serde_json::to_vec(&json::to_object(key))?)
                } else {
                    None
                },
                value: serde_json::to_vec(&json::to_object(value))?,
            }),
            Codec::Avro {
                key_schema,
                value_schema,
            } => {
                let key = match key_schema {
                    Some(schema) if has_key => Some(to_avro_datum(schema, avro::to_record(key)?)?),
                    _ => None,
                };
                Ok(TopicRecord {
                    key,
                    value: to_avro_datum(value_schema, avro::to_record(value)?)?,
                })
            }
        }
    }
}

#[async_trait]
impl SinkProcessor for TopicSink {
    async fn write(&mut self, row: Row) -> Result<(), AppError> {
        let record = self.encode(&row)?;
        let offset = self.topics.append(&self.topic, record);
        tracing::debug!("Appended record {} to topic {}", offset, self.topic);
        Ok(())
    }

    async fn complete(&mut self, _outcome: &Result<(), AppError>) -> Result<(), AppError> {
        Ok(())
    }
}
