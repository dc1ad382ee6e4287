// Target descriptors: everything the engine needs to read from or write to
// one external table, and nothing about how the fields were resolved.

use super::projector::RowProjector;
use super::{file, imap, kafka};
use crate::api::middleware::AppError;
use crate::engine::{EngineContext, Expression, SinkProcessor, SourceProcessor};
use crate::models::TableField;

#[derive(Debug, Clone, PartialEq)]
pub enum TargetDescriptor {
    FileAvro {
        path: String,
        glob: String,
        /// Generated write schema
        schema: String,
    },
    FileJson {
        path: String,
        glob: String,
    },
    MapJson {
        map_name: String,
    },
    KafkaAvro {
        topic: String,
        key_schema: Option<String>,
        value_schema: String,
    },
    KafkaJson {
        topic: String,
    },
}

impl TargetDescriptor {
    /// Source supplier applying `predicate` and `projection` to rows laid out
    /// as `fields`
    pub fn read_processor(
        &self,
        fields: Vec<TableField>,
        predicate: Option<Expression>,
        projection: Vec<Expression>,
    ) -> ReadProcessorSupplier {
        ReadProcessorSupplier {
            target: self.clone(),
            projector: RowProjector::new(fields, predicate, projection),
        }
    }

    /// Sink supplier encoding rows laid out as `fields`
    pub fn write_processor(&self, fields: Vec<TableField>) -> WriteProcessorSupplier {
        WriteProcessorSupplier {
            target: self.clone(),
            fields,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        matches!(self, TargetDescriptor::KafkaAvro { .. } | TargetDescriptor::KafkaJson { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ReadProcessorSupplier {
    target: TargetDescriptor,
    projector: RowProjector,
}

impl ReadProcessorSupplier {
    pub fn target(&self) -> &TargetDescriptor {
        &self.target
    }

    pub fn is_unbounded(&self) -> bool {
        self.target.is_unbounded()
    }

    pub fn open(&self, context: &EngineContext) -> Result<Box<dyn SourceProcessor>, AppError> {
        let projector = self.projector.clone();
        Ok(match &self.target {
            TargetDescriptor::FileAvro { path, glob, .. } => {
                Box::new(file::FileAvroSource::open(path, glob, projector)?)
            }
            TargetDescriptor::FileJson { path, glob } => {
                Box::new(file::FileJsonSource::open(path, glob, projector)?)
            }
            TargetDescriptor::MapJson { map_name } => {
                Box::new(imap::MapSource::open(&context.maps, map_name, projector))
            }
            TargetDescriptor::KafkaAvro {
                topic,
                key_schema,
                value_schema,
            } => Box::new(kafka::TopicSource::avro(
                context.topics.clone(),
                topic,
                key_schema.as_deref(),
                value_schema,
                projector,
            )?),
            TargetDescriptor::KafkaJson { topic } => {
                Box::new(kafka::TopicSource::json(context.topics.clone(), topic, projector))
            }
        })
    }
}

#[derive(Debug, Clone)]
pub struct WriteProcessorSupplier {
    target: TargetDescriptor,
    fields: Vec<TableField>,
}

impl WriteProcessorSupplier {
    pub fn target(&self) -> &TargetDescriptor {
        &self.target
    }

    pub fn open(&self, context: &EngineContext) -> Result<Box<dyn SinkProcessor>, AppError> {
        let fields = self.fields.clone();
        Ok(match &self.target {
            TargetDescriptor::FileAvro { path, schema, .. } => {
                Box::new(file::FileAvroSink::open(path, schema, fields)?)
            }
            TargetDescriptor::FileJson { path, .. } => Box::new(file::FileJsonSink::open(path, fields)?),
            TargetDescriptor::MapJson { map_name } => {
                Box::new(imap::MapSink::new(context.maps.clone(), map_name, fields))
            }
            TargetDescriptor::KafkaAvro {
                topic,
                key_schema,
                value_schema,
            } => Box::new(kafka::TopicSink::avro(
                context.topics.clone(),
                topic,
                key_schema.as_deref(),
                value_schema,
                fields,
            )?),
            TargetDescriptor::KafkaJson { topic } => {
                Box::new(kafka::TopicSink::json(context.topics.clone(), topic, fields))
            }
        })
    }
}
